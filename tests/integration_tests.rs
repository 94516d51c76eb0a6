//! Integration tests module loader

mod support;

mod integration {
    pub mod cli;
    pub mod rate_limiting;
    pub mod resume_capability;
    pub mod scrape_pipeline;
}

mod unit {
    pub mod checkpoint;
    pub mod config;
    pub mod credentials;
}
