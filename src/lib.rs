//! Wikipedia reference archiver library.
//!
//! A service that parses the citation list out of a Wikipedia article,
//! scrapes each cited source (falling back to the Wayback Machine for
//! paywalled or access-restricted content), and renders every capture to PDF
//! alongside the raw HTML.

pub mod config;
pub mod constants;
pub mod db;
pub mod progress;
pub mod renderer;
pub mod scraper;
pub mod storage;
pub mod wayback;
pub mod web;
pub mod wiki;
