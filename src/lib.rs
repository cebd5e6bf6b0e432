pub mod alarm;
pub mod config;
pub mod consts;
pub mod controller;
pub mod debounce;
pub mod homeassistant;
pub mod io;
pub mod polarity;
