pub mod writer;

pub use writer::{render_markdown, slugify, PlanWriteError, PlanWriter};
