//! Trusted background
//!
//! Hosts the keyring and the dispatcher behind the gateway. UI surfaces
//! talk to it directly; pages only through the relay.

mod confirmation;
mod handler;
mod messages;
mod runner;

pub use confirmation::{
    ConfirmationDecision, ConfirmationRequest, Confirmer, SurfaceConfirmer, SurfaceLauncher,
};
pub use handler::Background;
pub use messages::{
    PageAction, PublicAccount, Sensitive, WalletNotification, WalletRequest, WalletResponse,
};
pub use runner::{serve_relay, serve_ui, BackgroundRunner};
