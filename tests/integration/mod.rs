//! Integration tests module
//!
//! This module organizes all integration tests for the jukeboxd daemon.

// Import individual test modules
pub mod backend_switch_test;
pub mod config_test;
pub mod player_test;
pub mod process_playback_test;
pub mod queue_persistence_test;
