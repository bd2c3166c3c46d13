pub mod config;
pub mod controller;
pub mod corrections;
pub mod error;
pub mod events;
pub mod frame;
pub mod history;
pub mod library;
pub mod loader;
pub mod overlay;
pub mod power;
pub mod prerender;
pub mod surface;
pub mod render {
    pub mod window;
}
