pub mod api;
pub mod db;
pub mod dead_letter;
pub mod mqtt;
pub mod notifier;
