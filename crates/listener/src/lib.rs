//! TRIGRA webhook receiver.
//!
//! A small HTTP/1 server built on [`hyper`]:
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `/webhook` | `POST` | validate → parse → sync (see below) |
//! | `/health` | `GET` | `200 OK` |
//! | `/ready` | `GET` | `200 Ready` |
//! | anything else | | `404` (`405` for a known path with the wrong method) |
//!
//! A webhook delivery is validated by the configured [`gitops::GitProvider`]
//! (`400` on failure), decoded into a push event (`200` without syncing for
//! anything that is not a push) and synced through the [`gitops::SyncEngine`]
//! (`500` on failure). Syncs run one at a time. Bodies above
//! [`MAX_BODY_BYTES`] are refused with `413`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Only HTTP concerns live here; the webhook semantics
//! belong to the provider and the engine.

pub mod routes;
pub mod server;

pub use routes::{handle_request, ListenerState, MAX_BODY_BYTES};
pub use server::{ListenerError, WebhookServer, HEADER_READ_TIMEOUT};
