pub mod app;
pub mod event;
pub mod executor;
pub mod hotkey;
pub mod launcher;
pub mod login_item;
pub mod overlay_window;
pub mod run_loop;
pub mod screen;
pub mod timer;
pub mod window_server;
