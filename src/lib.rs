//! mina-bot - WhatsApp commerce assistant for small merchants
//!
//! Layered layout: `domain` holds entities and the trait seams,
//! `application` the services and worker pool, `infrastructure` the
//! dual-dialect persistence, channel adapters, classifier and renderer.

pub mod application;
pub mod domain;
pub mod infrastructure;
