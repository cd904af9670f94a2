mod analysis;
mod digest;
mod discovery;
mod feed;
mod item;
mod job;
mod profile;
mod subscription;

pub use analysis::*;
pub use digest::*;
pub use discovery::*;
pub use feed::*;
pub use item::*;
pub use job::*;
pub use profile::*;
pub use subscription::*;
