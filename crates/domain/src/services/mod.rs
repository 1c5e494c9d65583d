//! Domain services for MentorLink.
//!
//! Services contain the invitation lifecycle logic. Storage, email and
//! account creation are reached through traits.

pub mod clock;
pub mod dispatcher;
pub mod invitation_store;
pub mod issuance;
pub mod issuer;
pub mod memory;
pub mod registration;
pub mod verifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    DeliveryErrorClassifier, DeliveryMode, DispatcherSettings, EmailDispatcher, EmailProvider,
    InviteNotice, KeywordClassifier, MockEmailProvider, OutboundEmail, ProviderError, Sender,
    DEFAULT_DISPATCH_TIMEOUT,
};
pub use invitation_store::{InvitationStore, IssuedInvitation, ProfileStore, StoreError};
pub use issuance::{AtomicIssuance, IssuanceStrategy, OrchestratedIssuance};
pub use issuer::{InvitationIssuer, IssueError, IssueOutcome, IssueResult, IssuerSettings};
pub use memory::{InMemoryInvitationStore, InMemoryProfileStore};
pub use registration::{
    AccountError, AccountProvider, CompletionReport, LinkageError, RegistrationCompletion,
};
pub use verifier::{
    InvitationVerifier, MatchedBy, VerificationResult, VerifiedInvitation, VerifyInvite,
};
