//! Data processing for survey-site imagery.
//!
//! This crate turns sampled images into per-date statistics (clear-sky
//! percentage, NDVI, LAI, AOT), picks the dates closest to the end of a
//! survey window, and smooths index series for charting.

pub mod aggregate;
pub mod classify;
pub mod indices;
pub mod selection;
pub mod spline;
