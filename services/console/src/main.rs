//! Lectern administrative console.
//!
//! # Purpose
//! Signs in against the policy-administration service, keeps the session in a
//! token file, and edits policy groups and their permissions.
//!
//! # Notes
//! Administrative commands mount the same guarded panels the library exposes,
//! so a session without `admin.create` is redirected before any request is
//! made. `run` is split from `main` to keep the wiring testable.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lectern_client::guard::{AccessGuard, GuardOutcome, View};
use lectern_client::identity::{FileTokenStorage, IdentityStore};
use lectern_client::observability::init_tracing;
use lectern_client::panel::{GroupRow, PermissionCatalogPanel, PolicyGroupPanel};
use lectern_client::routes::{AdminScreen, HistoryNavigator, Route};
use lectern_client::session::sign_in;
use lectern_client::{AuthorizationClient, ClientConfig};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_OK: u8 = 0;
const EXIT_ACCESS_DENIED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "lectern-console")]
#[command(about = "Administer Lectern policy groups and permissions")]
struct Cli {
    /// YAML file overriding environment configuration
    #[arg(long, env = "LECTERN_CLIENT_CONFIG")]
    config: Option<String>,

    /// Policy service base URL (overrides configuration)
    #[arg(long)]
    api_base_url: Option<String>,

    /// Session token file (overrides configuration)
    #[arg(long)]
    token_path: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange credentials for a session token
    Login {
        username: String,
        #[arg(long, env = "LECTERN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the current identity
    Whoami,
    /// List policy groups with their permissions
    Groups,
    /// List the permission catalogue
    Permissions,
    /// Create a policy group
    AddGroup {
        name: String,
    },
    /// Rename a policy group; its grants follow the new name
    RenameGroup {
        id: i64,
        name: String,
    },
    /// Delete a policy group and its grants
    DeleteGroup {
        id: i64,
    },
    /// Grant a permission to a group
    Grant {
        group: String,
        permission: String,
    },
    /// Revoke a permission from a group
    Revoke {
        group: String,
        permission: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing("warn");
    let cli = Cli::parse();
    let mut stdout = std::io::stdout();
    let code = run(cli, &mut stdout).await?;
    Ok(ExitCode::from(code))
}

struct Console {
    store: Arc<IdentityStore>,
    client: AuthorizationClient,
    navigator: Arc<HistoryNavigator>,
}

impl Console {
    async fn open(cli: &Cli) -> Result<Self> {
        let mut config = ClientConfig::from_env_or_yaml(cli.config.as_deref())?;
        if let Some(url) = &cli.api_base_url {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = &cli.token_path {
            config.token_path = path.clone();
        }
        let storage = Arc::new(FileTokenStorage::new(config.token_path.clone()));
        let store = Arc::new(IdentityStore::new(storage));
        store.init().await;
        let client =
            AuthorizationClient::new(&config, store.clone()).context("build policy client")?;
        Ok(Self {
            store,
            client,
            navigator: Arc::new(HistoryNavigator::new()),
        })
    }

    fn guard<V: View>(&self, view: V, screen: AdminScreen) -> AccessGuard<V> {
        AccessGuard::for_route(
            view,
            Route::Admin(screen),
            self.store.clone(),
            self.navigator.clone(),
        )
    }

    /// Mount the groups panel; `None` means the session was redirected.
    async fn groups_panel(&self) -> Result<Option<AccessGuard<PolicyGroupPanel>>> {
        let guard = self.guard(PolicyGroupPanel::new(self.client.clone()), AdminScreen::Groups);
        match guard.mount(()).await {
            GuardOutcome::Rendered(rows) => {
                rows?;
                Ok(Some(guard))
            }
            GuardOutcome::Redirected(_) => Ok(None),
        }
    }
}

/// Execute one command, returning the process exit status.
async fn run(cli: Cli, out: &mut impl Write) -> Result<u8> {
    let console = Console::open(&cli).await?;
    match cli.command {
        Command::Login { username, password } => {
            let identity = sign_in(&console.client, &console.store, &username, &password).await?;
            writeln!(
                out,
                "signed in as {} (id {})",
                identity.subject_label(),
                identity.subject_id()
            )?;
        }
        Command::Logout => {
            console.store.logout().await?;
            writeln!(out, "signed out")?;
        }
        Command::Whoami => match console.store.current().identity() {
            Some(identity) => {
                let capabilities: Vec<&str> =
                    identity.capabilities().iter().map(|c| c.as_str()).collect();
                writeln!(
                    out,
                    "{} (id {}) group={} capabilities=[{}]",
                    identity.subject_label(),
                    identity.subject_id(),
                    identity.group_name().unwrap_or("-"),
                    capabilities.join(", ")
                )?;
            }
            None => writeln!(out, "not signed in")?,
        },
        Command::Permissions => {
            let guard = console.guard(
                PermissionCatalogPanel::new(console.client.clone()),
                AdminScreen::Permissions,
            );
            let GuardOutcome::Rendered(permissions) = guard.mount(()).await else {
                return access_denied(out);
            };
            for permission in permissions? {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    permission.id, permission.namespace, permission.display_name
                )?;
            }
        }
        Command::Groups => {
            let Some(guard) = console.groups_panel().await? else {
                return access_denied(out);
            };
            print_rows(out, &guard.view().rows())?;
        }
        Command::AddGroup { name } => {
            let Some(guard) = console.groups_panel().await? else {
                return access_denied(out);
            };
            match guard.view().add_group(&name).await? {
                Some(group) => writeln!(out, "created group {} ({})", group.name, group.id)?,
                None => writeln!(out, "group name is blank, nothing to do")?,
            }
        }
        Command::RenameGroup { id, name } => {
            let Some(guard) = console.groups_panel().await? else {
                return access_denied(out);
            };
            match guard.view().rename_group(id, &name).await? {
                Some(group) => writeln!(out, "renamed group {} to {}", group.id, group.name)?,
                None => writeln!(out, "group name is blank, nothing to do")?,
            }
        }
        Command::DeleteGroup { id } => {
            let Some(guard) = console.groups_panel().await? else {
                return access_denied(out);
            };
            guard.view().delete_group(id).await?;
            writeln!(out, "deleted group {id}")?;
        }
        Command::Grant { group, permission } => {
            let Some(guard) = console.groups_panel().await? else {
                return access_denied(out);
            };
            let change = guard.view().grant(&group, &permission).await?;
            writeln!(out, "grant {permission} to {group}: {change:?}")?;
        }
        Command::Revoke { group, permission } => {
            let Some(guard) = console.groups_panel().await? else {
                return access_denied(out);
            };
            let change = guard.view().revoke(&group, &permission).await?;
            writeln!(out, "revoke {permission} from {group}: {change:?}")?;
        }
    }
    Ok(EXIT_OK)
}

fn access_denied(out: &mut impl Write) -> Result<u8> {
    writeln!(
        out,
        "access denied ({}): this command requires the {} capability",
        Route::AccessDenied,
        lectern_authz::ADMIN_CAPABILITY
    )?;
    Ok(EXIT_ACCESS_DENIED)
}

fn print_rows(out: &mut impl Write, rows: &[GroupRow]) -> Result<()> {
    for row in rows {
        let permissions: Vec<&str> = row.permissions.iter().map(String::as_str).collect();
        writeln!(
            out,
            "{}\t{}\t{}",
            row.group.id,
            row.group.name,
            permissions.join(",")
        )?;
    }
    Ok(())
}
