//! tfprobe - staged verification of IP-restricted IAM policies
//!
//! This crate provisions a Terraform module that creates an IAM user with an
//! IP-restricted policy, probes SQS with the user's credentials from both a
//! denied and an allowed configuration, and tears the infrastructure down
//! afterwards regardless of the outcome.

pub mod aws;
pub mod config;
pub mod public_ip;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod state;
pub mod terraform;
