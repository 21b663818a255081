//! Basket engine services
//!
//! Pure recurrence matching, the cycle count cache, the reconciler and its
//! dispatcher, plus the mutation services that trigger recomputation.

pub mod calendar;
pub mod count_cache;
pub mod cycles;
pub mod depots;
pub mod dispatcher;
pub mod matcher;
pub mod memberships;
pub mod reconciler;

pub use calendar::CalendarService;
pub use count_cache::CountCache;
pub use cycles::CycleService;
pub use depots::DepotService;
pub use dispatcher::{Dispatcher, RecomputeEvent};
pub use matcher::{match_deliveries, Matcher};
pub use memberships::MembershipService;
pub use reconciler::{
    CycleReassignment, CycleResolution, FirstByOrdering, ReconcileError, ReconcileOutcome,
    Reconciler,
};
