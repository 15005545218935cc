pub mod badge;
pub mod host;
pub mod prefs;
pub mod scheduler;
pub mod tabs;
