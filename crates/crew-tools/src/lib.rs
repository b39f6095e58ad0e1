//! Native tool implementations for crew.
//!
//! Every tool implements the `Tool` trait from crew-core. Filesystem
//! tools are confined to a branch worktree by the [`sandbox`]; the shell
//! tool reclassifies each command through the [`risk`] classifier and
//! refuses destructive ones.
//!
//! # Tools
//!
//! - **Files** ([`file_tools`]): `read_file`, `write_file`, `edit_file`
//! - **Search** ([`search_tools`]): `glob`, `grep`
//! - **Shell** ([`shell_tool`]): `exec_shell`
//! - **Git** ([`git_tools`]): `git_commit`, `git_push`
//! - **PRs** ([`pr_tools`]): `pr_create`, `pr_merge`, `pr_edit`, `pr_status`
//! - **Chat** ([`message_tool`]): `send_message`
//! - **Web** ([`web_search`], [`web_fetch`]): `web_search`, `web_fetch`

pub mod file_tools;
pub mod git_tools;
pub mod message_tool;
pub mod pr_tools;
pub mod risk;
pub mod sandbox;
pub mod search_tools;
pub mod shell_tool;
pub mod web_fetch;
pub mod web_search;

use std::sync::Arc;

use crew_core::tools::registry::{ToolError, ToolRegistry};
use crew_core::transport::ChatTransport;

use crate::sandbox::Sandbox;

/// Register every native tool with the given registry.
///
/// Native tools register before subprocess discovery, so they win name
/// collisions. Restricted tools are registered too: the registry hides
/// them from this role's listing and rejects their execution, which
/// keeps the error message ("not available for role") distinct from an
/// unknown tool.
pub fn register_all(
    registry: &mut ToolRegistry,
    sandbox: &Sandbox,
    transport: Arc<dyn ChatTransport>,
    search_endpoint: Option<String>,
) -> Result<(), ToolError> {
    let workdir = sandbox.root().to_path_buf();

    registry.register(Arc::new(file_tools::ReadFileTool::new(sandbox.clone())))?;
    registry.register(Arc::new(file_tools::WriteFileTool::new(sandbox.clone())))?;
    registry.register(Arc::new(file_tools::EditFileTool::new(sandbox.clone())))?;
    registry.register(Arc::new(search_tools::GlobTool::new(sandbox.clone())))?;
    registry.register(Arc::new(search_tools::GrepTool::new(sandbox.clone())))?;
    registry.register(Arc::new(shell_tool::ShellTool::new(workdir.clone())))?;
    registry.register(Arc::new(git_tools::GitCommitTool::new(workdir.clone())))?;
    registry.register(Arc::new(git_tools::GitPushTool::new(workdir.clone())))?;
    registry.register(Arc::new(pr_tools::PrCreateTool::new(workdir.clone())))?;
    registry.register(Arc::new(pr_tools::PrMergeTool::new(workdir.clone())))?;
    registry.register(Arc::new(pr_tools::PrEditTool::new(workdir.clone())))?;
    registry.register(Arc::new(pr_tools::PrStatusTool::new(workdir)))?;
    registry.register(Arc::new(message_tool::SendMessageTool::new(transport)))?;
    registry.register(Arc::new(web_search::WebSearchTool::new(search_endpoint)))?;
    registry.register(Arc::new(web_fetch::WebFetchTool::new()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crew_core::transport::ConnectionState;
    use crew_types::Role;
    use tokio::sync::watch;

    struct NullTransport {
        state_tx: watch::Sender<ConnectionState>,
    }

    impl NullTransport {
        fn new() -> Arc<Self> {
            let (state_tx, _) = watch::channel(ConnectionState::Connected);
            Arc::new(Self { state_tx })
        }
    }

    #[async_trait]
    impl ChatTransport for NullTransport {
        async fn post_text(
            &self,
            _channel: &str,
            _thread_id: &str,
            _text: &str,
        ) -> crew_types::Result<String> {
            Ok("m1".into())
        }
        async fn upload(
            &self,
            _channel: &str,
            _thread_id: &str,
            _data: &[u8],
            _caption: &str,
        ) -> crew_types::Result<String> {
            Ok("m1".into())
        }
        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
        fn state_changes(&self) -> watch::Receiver<ConnectionState> {
            self.state_tx.subscribe()
        }
    }

    #[test]
    fn registers_all_fifteen_tools() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let mut registry = ToolRegistry::new(Role::Coder);

        register_all(&mut registry, &sandbox, NullTransport::new(), None).unwrap();
        assert_eq!(registry.len(), 15);
        // Coder sees everything.
        assert_eq!(registry.list().len(), 15);
    }

    #[test]
    fn restricted_roles_see_fewer_tools() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let mut registry = ToolRegistry::new(Role::Pm);

        register_all(&mut registry, &sandbox, NullTransport::new(), None).unwrap();
        let visible = registry.list();
        assert_eq!(visible.len(), 10);
        assert!(!visible.contains(&"write_file".to_string()));
        assert!(!visible.contains(&"pr_create".to_string()));
        assert!(visible.contains(&"read_file".to_string()));
    }
}
