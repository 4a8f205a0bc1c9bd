#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod gateway;
pub mod health;
pub mod hub;
pub mod presence;
pub mod reaper;
pub mod services;
pub mod sessions;





#[cfg(test)]
mod quic_gateway_tests;

#[cfg(test)]
mod test_support;
