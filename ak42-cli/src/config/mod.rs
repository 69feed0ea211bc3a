pub mod export_config;
