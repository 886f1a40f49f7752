pub mod api;
pub mod contract;
pub mod db;
pub mod i18n;
pub mod settings;
pub mod tutor;
