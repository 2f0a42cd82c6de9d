//! Backend automation for an employee-attendance app.
//!
//! Three queue functions react to writes in a Realtime Database: attendance
//! alerts and admin broadcasts become topic notifications, and delete
//! requests remove a user's identity and profile. The functions run on a
//! small self-hosted trigger runtime that streams the queue paths over SSE.

pub mod auth;
pub mod config;
pub mod core;
pub mod database;
pub mod functions;
pub mod handlers;
pub mod messaging;

use std::sync::Arc;

use auth::FirebaseAuth;
use config::Config;
use core::middleware::AuthMiddleware;
use database::{DatabaseError, FirebaseDatabase};
use messaging::FirebaseMessaging;

/// The service clients shared by every function of the process.
///
/// Clients are created once and share a single authenticator, so all of
/// them draw from the same token cache.
pub struct FunctionsApp {
    auth: Arc<FirebaseAuth>,
    messaging: Arc<FirebaseMessaging>,
    database: Arc<FirebaseDatabase>,
}

impl FunctionsApp {
    pub fn new(config: &Config) -> Result<Self, DatabaseError> {
        let middleware = AuthMiddleware::new(config.service_account.clone());

        Ok(Self {
            auth: Arc::new(FirebaseAuth::new(middleware.clone())),
            messaging: Arc::new(FirebaseMessaging::new(middleware.clone())),
            database: Arc::new(FirebaseDatabase::new(
                middleware,
                config.database_url.clone(),
            )?),
        })
    }

    pub fn auth(&self) -> Arc<FirebaseAuth> {
        self.auth.clone()
    }

    pub fn messaging(&self) -> Arc<FirebaseMessaging> {
        self.messaging.clone()
    }

    pub fn database(&self) -> Arc<FirebaseDatabase> {
        self.database.clone()
    }
}
