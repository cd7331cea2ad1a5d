//! Well-known [`TestPackage`](crate::package::TestPackage) setting names.

/// Upper bound on concurrently running worker processes (usize).
pub const MAX_AGENTS: &str = "MaxAgents";

/// Milliseconds to wait for a launched worker to connect back (u64).
pub const AGENT_LAUNCH_TIMEOUT: &str = "AgentLaunchTimeout";

/// Working directory for worker processes (string).
pub const WORK_DIRECTORY: &str = "WorkDirectory";
