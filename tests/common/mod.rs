pub mod logging;
pub mod relay_node;
