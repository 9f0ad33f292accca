
pub mod completions;
pub mod export;
pub mod revmap;
