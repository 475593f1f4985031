mod engine;
mod loader;
mod rule;

pub use engine::ReplacementEngine;
pub use loader::load_rules_dir;
pub use rule::ReplacementRule;
