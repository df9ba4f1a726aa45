mod resolver;

pub use resolver::{StandaloneResolver, content_hash};
