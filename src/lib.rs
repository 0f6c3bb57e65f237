// src/lib.rs

pub mod config;

pub mod models {
    pub mod availability_table;
}

pub mod scrapers;

pub mod services {
    pub mod blob_storage;
    pub mod local_storage;
    pub mod table_merger;
    pub mod time_window;
}

pub mod jobs;
