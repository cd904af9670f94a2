//! Weekly report emails.
//!
//! Mail clients drop `<style>` blocks and classes, so every element carries
//! its own inline `style` attribute.

use chrono::{DateTime, Utc};
use pulldown_cmark::escape::escape_html;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};

use crate::models::ReportKind;

const BODY_STYLE: &str = "margin:0;padding:24px;background:#f5f5f4;font-family:-apple-system,'Segoe UI',Helvetica,Arial,sans-serif;color:#1c1917;";
const CARD_STYLE: &str = "max-width:640px;margin:0 auto;padding:32px;background:#ffffff;border-radius:8px;";
const TITLE_STYLE: &str = "margin:0 0 4px 0;font-size:22px;";
const RANGE_STYLE: &str = "margin:0 0 24px 0;font-size:13px;color:#78716c;";
const H1_STYLE: &str = "margin:24px 0 8px 0;font-size:20px;";
const H2_STYLE: &str = "margin:20px 0 8px 0;font-size:17px;";
const H3_STYLE: &str = "margin:16px 0 6px 0;font-size:15px;";
const P_STYLE: &str = "margin:0 0 12px 0;font-size:15px;line-height:1.6;";
const LIST_STYLE: &str = "margin:0 0 12px 0;padding-left:20px;";
const LI_STYLE: &str = "margin:0 0 6px 0;font-size:15px;line-height:1.6;";
const LINK_STYLE: &str = "color:#2563eb;text-decoration:underline;";
const CODE_STYLE: &str = "padding:1px 4px;background:#f5f5f4;border-radius:3px;font-family:Menlo,Consolas,monospace;font-size:13px;";
const PRE_STYLE: &str = "margin:0 0 12px 0;padding:12px;background:#f5f5f4;border-radius:6px;font-family:Menlo,Consolas,monospace;font-size:13px;white-space:pre-wrap;";
const QUOTE_STYLE: &str = "margin:0 0 12px 0;padding:0 0 0 12px;border-left:3px solid #d6d3d1;color:#57534e;";
const HR_STYLE: &str = "margin:20px 0;border:none;border-top:1px solid #e7e5e4;";
const FOOTER_STYLE: &str = "margin:32px 0 0 0;font-size:12px;color:#a8a29e;";

/// Renders a report's markdown into a standalone HTML email.
///
/// Raw HTML from the model is escaped and shown as text. Links are kept only
/// for http(s) and mailto targets.
pub fn render_report_email(
    kind: ReportKind,
    markdown: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"{BODY_STYLE}\"><div style=\"{CARD_STYLE}\">\
         <h1 style=\"{TITLE_STYLE}\">{title}</h1>\
         <p style=\"{RANGE_STYLE}\">{from} to {to}</p>\
         {body}\
         <p style=\"{FOOTER_STYLE}\">Sent by NeoFeed</p>\
         </div></body></html>",
        title = kind.title(),
        from = start.format("%Y-%m-%d"),
        to = end.format("%Y-%m-%d"),
        body = markdown_to_html(markdown),
    )
}

/// Subject line matching the rendered email.
pub fn report_subject(kind: ReportKind, end: DateTime<Utc>) -> String {
    format!("{} for {}", kind.title(), end.format("%Y-%m-%d"))
}

fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(markdown.len() * 2);
    // One entry per open link: whether an <a> was actually emitted.
    let mut links: Vec<bool> = Vec::new();

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(tag) => open_tag(&mut out, tag, &mut links),
            Event::End(tag) => close_tag(&mut out, tag, &mut links),
            Event::Text(text) | Event::Html(text) => push_text(&mut out, &text),
            Event::Code(code) => {
                out.push_str(&format!("<code style=\"{CODE_STYLE}\">"));
                push_text(&mut out, &code);
                out.push_str("</code>");
            }
            Event::SoftBreak | Event::HardBreak => out.push_str("<br>"),
            Event::Rule => out.push_str(&format!("<hr style=\"{HR_STYLE}\">")),
            _ => {}
        }
    }
    out
}

fn open_tag(out: &mut String, tag: Tag, links: &mut Vec<bool>) {
    match tag {
        Tag::Paragraph => out.push_str(&format!("<p style=\"{P_STYLE}\">")),
        Tag::Heading(level, ..) => {
            let (n, style) = heading(level);
            out.push_str(&format!("<h{n} style=\"{style}\">"));
        }
        Tag::BlockQuote => out.push_str(&format!("<blockquote style=\"{QUOTE_STYLE}\">")),
        Tag::CodeBlock(_) => out.push_str(&format!("<pre style=\"{PRE_STYLE}\">")),
        Tag::List(Some(first)) => {
            out.push_str(&format!("<ol start=\"{first}\" style=\"{LIST_STYLE}\">"))
        }
        Tag::List(None) => out.push_str(&format!("<ul style=\"{LIST_STYLE}\">")),
        Tag::Item => out.push_str(&format!("<li style=\"{LI_STYLE}\">")),
        Tag::Emphasis => out.push_str("<em>"),
        Tag::Strong => out.push_str("<strong>"),
        Tag::Strikethrough => out.push_str("<del>"),
        Tag::Link(_, dest, _) => {
            let allowed = is_mail_safe_link(&dest);
            if allowed {
                out.push_str("<a href=\"");
                push_text(out, &dest);
                out.push_str(&format!("\" style=\"{LINK_STYLE}\">"));
            }
            links.push(allowed);
        }
        _ => {}
    }
}

fn close_tag(out: &mut String, tag: Tag, links: &mut Vec<bool>) {
    match tag {
        Tag::Paragraph => out.push_str("</p>"),
        Tag::Heading(level, ..) => out.push_str(&format!("</h{}>", heading(level).0)),
        Tag::BlockQuote => out.push_str("</blockquote>"),
        Tag::CodeBlock(_) => out.push_str("</pre>"),
        Tag::List(Some(_)) => out.push_str("</ol>"),
        Tag::List(None) => out.push_str("</ul>"),
        Tag::Item => out.push_str("</li>"),
        Tag::Emphasis => out.push_str("</em>"),
        Tag::Strong => out.push_str("</strong>"),
        Tag::Strikethrough => out.push_str("</del>"),
        Tag::Link(..) => {
            if links.pop().unwrap_or(false) {
                out.push_str("</a>");
            }
        }
        _ => {}
    }
}

/// Emails only get three heading sizes; deeper levels share the smallest.
fn heading(level: HeadingLevel) -> (u8, &'static str) {
    match level {
        HeadingLevel::H1 => (1, H1_STYLE),
        HeadingLevel::H2 => (2, H2_STYLE),
        _ => (3, H3_STYLE),
    }
}

fn is_mail_safe_link(dest: &str) -> bool {
    let dest = dest.trim_start().to_ascii_lowercase();
    dest.starts_with("https://") || dest.starts_with("http://") || dest.starts_with("mailto:")
}

fn push_text(out: &mut String, text: &str) {
    // Writing into a String cannot fail.
    let _ = escape_html(&mut *out, text);
}
