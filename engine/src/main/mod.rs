pub mod gpu;
pub mod passes;
pub mod render_pass;
pub mod resources;
pub mod scheduler;
