mod config;
mod session;
mod stream;
