//! Concrete notification sources and parsers for circuitwatch.
//!
//! Sources are selected from the configured URL by [`sources::build_source`];
//! parsers are resolved per provider type through [`parsers::StaticParserRegistry`].

pub mod parsers;
pub mod sources;

pub use parsers::{StaticParserRegistry, default_registry};
pub use sources::build_source;
