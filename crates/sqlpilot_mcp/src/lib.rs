pub mod client;

pub use client::ToolboxClient;
