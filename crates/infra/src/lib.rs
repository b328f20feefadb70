//! Infrastructure layer: storage backends, batch import and use-case services.

pub mod db;
pub mod import;
pub mod services;

#[cfg(test)]
mod integration_tests;
