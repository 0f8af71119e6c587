//! Upscale Chain Worker Library
//!
//! Selects a resolution/fps-bounded chain of super-resolution models for a video and
//! assembles it into a VapourSynth pipeline, building TensorRT engines on demand.

pub mod models;
pub mod error;
pub mod chain_selector;
pub mod conf_parser;
pub mod dependency_locator;
pub mod engine_cache;
pub mod engine_settings;
pub mod frame_graph;
pub mod hardware;
pub mod pipeline_assembler;
pub mod pipeline_executor;
pub mod profile_runner;
pub mod progress_reporter;
pub mod run_context;
pub mod script_generator;
pub mod stage_builder;
pub mod trace;
