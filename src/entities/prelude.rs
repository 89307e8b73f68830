pub use super::logs::Entity as Logs;
pub use super::nodes::Entity as Nodes;
pub use super::sync_status::Entity as SyncStatus;
pub use super::system::Entity as System;
