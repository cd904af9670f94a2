pub const SCHEMA: &str = r#"
-- profiles table (per-user AI configuration lives here as JSON)
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    email TEXT,
    api_key TEXT UNIQUE,
    ai_config TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- items table (user submissions)
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    url TEXT,
    title TEXT,
    content_raw TEXT,
    summary TEXT,
    takeaways TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    category TEXT NOT NULL DEFAULT 'other',
    emotion TEXT,
    reading_time INTEGER,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'done', 'failed')),
    analysis_status TEXT,
    source_type TEXT NOT NULL DEFAULT 'manual_url',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_owner_created ON items(owner_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_items_owner_status ON items(owner_id, status);

-- subscriptions table
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    url TEXT NOT NULL,
    themes TEXT NOT NULL DEFAULT '[]',
    last_polled_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(owner_id, url)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_owner ON subscriptions(owner_id);

-- discovery_items table (latest poll result per owner and source)
CREATE TABLE IF NOT EXISTS discovery_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    summary TEXT NOT NULL,
    reason TEXT NOT NULL,
    source_name TEXT NOT NULL,
    category TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_discovery_owner_source ON discovery_items(owner_id, source_name);

-- digest_cache table (one row per owner)
CREATE TABLE IF NOT EXISTS digest_cache (
    owner_id TEXT PRIMARY KEY,
    digest TEXT NOT NULL,
    image_url TEXT,
    item_count INTEGER NOT NULL,
    degraded INTEGER NOT NULL DEFAULT 0,
    generated_at TEXT NOT NULL
);

-- weekly_reports table
CREATE TABLE IF NOT EXISTS weekly_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_weekly_reports_owner ON weekly_reports(owner_id, created_at DESC);
"#;
