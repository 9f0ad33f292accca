
pub mod errors;
pub mod exporter;
pub mod revmap;
pub mod revset;
pub mod sink;
pub mod svndiff;
pub mod svndump;
pub mod svnlog;
pub mod util;
