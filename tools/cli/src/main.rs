//! keyhaven CLI - Command line interface for a zero-knowledge vault.
//!
//! The tool drives the full client and server flow against a local
//! directory: the server half stores its records under `<dir>/server`, the
//! client keeps `profile.json` and `replica.json` next to it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use keyhaven_common::{ItemId, SensitiveBytes};
use keyhaven_crypto::KdfParams;
use keyhaven_server::{InProcessRemote, Server, ServerConfig};
use keyhaven_storage::LocalStore;
use keyhaven_sync::{LocalReplica, SyncConfig, SyncReconciler};
use keyhaven_vault::api::AuthenticateRequest;
use keyhaven_vault::{
    derive_in_background, ClientProfile, ItemPayload, LoginData, PasswordRotation,
    Registration, SecureNoteData, VaultSession,
};

const PROFILE_FILE: &str = "profile.json";
const REPLICA_FILE: &str = "replica.json";
const SERVER_DIR: &str = "server";

#[derive(Parser)]
#[command(name = "keyhaven")]
#[command(about = "keyhaven - Zero-knowledge password vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Vault directory.
    #[arg(short, long, default_value = ".keyhaven")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity.
    Register {
        /// Account email.
        #[arg(short, long)]
        email: String,

        /// Optional unencrypted password hint.
        #[arg(long)]
        hint: Option<String>,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,
    },

    /// Add a login item.
    AddLogin {
        /// Display name.
        #[arg(short, long)]
        name: String,

        /// Username for the site.
        #[arg(short, long)]
        username: Option<String>,

        /// Site URI (repeatable).
        #[arg(long = "uri")]
        uris: Vec<String>,

        /// Free-form notes.
        #[arg(long)]
        notes: Option<String>,
    },

    /// Add a secure note.
    AddNote {
        /// Note title.
        #[arg(short, long)]
        title: String,

        /// Note body.
        #[arg(short, long)]
        note: String,
    },

    /// List items.
    List,

    /// Show one item.
    Show {
        /// Item id.
        id: String,

        /// Print secret fields.
        #[arg(long)]
        reveal: bool,
    },

    /// Remove an item.
    Remove {
        /// Item id.
        id: String,
    },

    /// Push local changes and pull the server's.
    Sync {
        /// Forget the sync watermark and refetch every item.
        #[arg(long)]
        full: bool,
    },

    /// Change the master password.
    ChangePassword {
        /// KDF strength for the new password; keeps the current one if unset.
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Show identity and replica information.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dir = cli.dir;
    match cli.command {
        Commands::Register {
            email,
            hint,
            strength,
        } => cmd_register(&dir, &email, hint, &strength).await,

        Commands::AddLogin {
            name,
            username,
            uris,
            notes,
        } => cmd_add_login(&dir, name, username, uris, notes).await,

        Commands::AddNote { title, note } => cmd_add_note(&dir, title, note).await,

        Commands::List => cmd_list(&dir).await,

        Commands::Show { id, reveal } => cmd_show(&dir, &id, reveal).await,

        Commands::Remove { id } => cmd_remove(&dir, &id).await,

        Commands::Sync { full } => cmd_sync(&dir, full).await,

        Commands::ChangePassword { strength } => {
            cmd_change_password(&dir, strength.as_deref()).await
        }

        Commands::Info => cmd_info(&dir).await,
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password.into_bytes()))
}

fn prompt_new_password() -> Result<Zeroizing<Vec<u8>>> {
    let password = prompt_password("Enter new password: ")?;
    let confirm = prompt_password("Confirm new password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

fn parse_strength(strength: &str) -> Result<KdfParams> {
    match strength {
        "interactive" => Ok(KdfParams::interactive()),
        "moderate" => Ok(KdfParams::moderate()),
        "sensitive" => Ok(KdfParams::sensitive()),
        _ => anyhow::bail!("Invalid strength. Use: interactive, moderate, or sensitive"),
    }
}

fn open_server(dir: &Path) -> Result<Arc<Server>> {
    let store = Arc::new(
        LocalStore::new(dir.join(SERVER_DIR)).context("Failed to open server store")?,
    );
    Ok(Arc::new(Server::new(
        store.clone(),
        store,
        ServerConfig::default(),
    )))
}

/// An unlocked vault with a connected reconciler.
struct Unlocked {
    server: Arc<Server>,
    profile: ClientProfile,
    session: VaultSession,
    replica: LocalReplica,
    reconciler: SyncReconciler<InProcessRemote>,
}

impl Unlocked {
    async fn save(&self, dir: &Path) -> Result<()> {
        self.profile
            .save(dir.join(PROFILE_FILE))
            .context("Failed to save profile")?;
        self.replica
            .save(dir.join(REPLICA_FILE))
            .await
            .context("Failed to save replica")?;
        Ok(())
    }

    async fn synchronize(&mut self) -> Result<()> {
        let (pushed, merged) = self
            .reconciler
            .synchronize(&mut self.replica)
            .await
            .context("Sync failed")?;
        for conflict in &merged.conflicts {
            warn!(item_id = %conflict.item_id, kind = ?conflict.kind, "Local change discarded");
        }
        info!(
            pushed = pushed.inserted + pushed.updated + pushed.deleted,
            pulled = merged.created + merged.updated,
            removed = merged.deleted,
            "Synchronized"
        );
        Ok(())
    }

    /// Persist staged changes, then push them.
    ///
    /// The replica is written before and after synchronizing, so a failed
    /// push leaves the staged change on disk for the next run.
    async fn commit(&mut self, dir: &Path) -> Result<()> {
        self.save(dir).await?;
        self.synchronize().await?;
        self.save(dir).await
    }
}

/// Prompt for the master password, authenticate and unlock.
///
/// Ctrl-C during key derivation aborts cleanly.
async fn unlock(dir: &Path) -> Result<Unlocked> {
    let mut profile = ClientProfile::load(dir.join(PROFILE_FILE))
        .context("No profile found; run `keyhaven register` first")?;
    let server = open_server(dir)?;
    let password = prompt_password("Enter password: ")?;

    let prelogin = server
        .identity()
        .prelogin(&profile.email)
        .await
        .context("Prelogin failed")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    let derived = derive_in_background(
        SensitiveBytes::new(password.to_vec()),
        prelogin.salt,
        prelogin.kdf_params,
        &cancel,
    )
    .await;
    watcher.abort();
    let derived = derived.context("Key derivation failed")?;

    let auth = server
        .identity()
        .authenticate(AuthenticateRequest {
            email: profile.email.clone(),
            verifier: derived.verifier.clone(),
        })
        .await
        .context("Wrong password")?;

    let secrets = server
        .identity()
        .secrets(auth.identity_id)
        .await
        .context("Failed to fetch key material")?;
    profile.apply_secrets(secrets);

    let session = VaultSession::from_derived(&profile, &derived).context("Failed to unlock")?;
    let replica = LocalReplica::load(dir.join(REPLICA_FILE))
        .await
        .context("Failed to load replica")?;
    let reconciler = SyncReconciler::new(server.connect(auth.token), SyncConfig::default());

    Ok(Unlocked {
        server,
        profile,
        session,
        replica,
        reconciler,
    })
}

/// Register a new identity.
async fn cmd_register(dir: &Path, email: &str, hint: Option<String>, strength: &str) -> Result<()> {
    info!("Registering {}", email);

    let kdf_params = parse_strength(strength)?;
    if dir.join(PROFILE_FILE).exists() {
        anyhow::bail!("A profile already exists in {}", dir.display());
    }
    let password = prompt_new_password()?;

    let registration = Registration::create(email, &password, hint, kdf_params)
        .context("Failed to generate keys")?;
    let server = open_server(dir)?;
    let response = server
        .identity()
        .register(registration.request().clone())
        .await
        .context("Registration failed")?;

    let profile = ClientProfile::from_registration(registration.request(), &response);
    profile
        .save(dir.join(PROFILE_FILE))
        .context("Failed to save profile")?;
    LocalReplica::new()
        .save(dir.join(REPLICA_FILE))
        .await
        .context("Failed to save replica")?;

    println!("Identity registered successfully!");
    println!("  ID: {}", response.id);
    println!("  Email: {}", profile.email);
    println!("  Location: {}", dir.display());

    Ok(())
}

async fn add_item(dir: &Path, payload: ItemPayload) -> Result<()> {
    payload.validate()?;
    let mut vault = unlock(dir).await?;

    let item = vault.session.seal_item(&payload).context("Failed to encrypt item")?;
    let id = item.id;
    vault.replica.stage_create(item)?;
    vault.commit(dir).await?;

    println!("Item added: {} ({})", payload.title(), id);
    Ok(())
}

/// Add a login item.
async fn cmd_add_login(
    dir: &Path,
    name: String,
    username: Option<String>,
    uris: Vec<String>,
    notes: Option<String>,
) -> Result<()> {
    let password = rpassword::prompt_password("Item password (blank for none): ")
        .context("Failed to read item password")?;
    let password = Some(password).filter(|p| !p.is_empty());

    add_item(
        dir,
        ItemPayload::Login(LoginData {
            name,
            username,
            password,
            uris,
            totp: None,
            notes,
        }),
    )
    .await
}

/// Add a secure note.
async fn cmd_add_note(dir: &Path, title: String, note: String) -> Result<()> {
    add_item(dir, ItemPayload::SecureNote(SecureNoteData { title, note })).await
}

/// List items.
async fn cmd_list(dir: &Path) -> Result<()> {
    let mut vault = unlock(dir).await?;
    vault.synchronize().await?;
    vault.save(dir).await?;

    let items = vault.replica.items();
    if items.is_empty() {
        println!("Vault is empty.");
        return Ok(());
    }

    println!("Items:");
    for item in items {
        match vault.session.open_item(item) {
            Ok(payload) => println!("  {}  [{}] {}", item.id, item.item_type, payload.title()),
            Err(e) => println!("  {}  [{}] <unreadable: {}>", item.id, item.item_type, e),
        }
    }
    Ok(())
}

/// Show one item.
async fn cmd_show(dir: &Path, id: &str, reveal: bool) -> Result<()> {
    let id: ItemId = id.parse().context("Invalid item id")?;
    let mut vault = unlock(dir).await?;
    vault.synchronize().await?;
    vault.save(dir).await?;

    let item = vault
        .replica
        .get(&id)
        .with_context(|| format!("Item {} not found", id))?;
    let payload = vault.session.open_item(item).context("Failed to decrypt item")?;
    let secret = |value: &Option<String>| match value {
        Some(_) if !reveal => "********".to_string(),
        Some(value) => value.clone(),
        None => "-".to_string(),
    };

    println!("Item {}:", id);
    println!("  Type: {}", item.item_type);
    println!("  Modified: {}", item.last_modified);
    match &payload {
        ItemPayload::Login(login) => {
            println!("  Name: {}", login.name);
            println!("  Username: {}", login.username.as_deref().unwrap_or("-"));
            println!("  Password: {}", secret(&login.password));
            for uri in &login.uris {
                println!("  URI: {}", uri);
            }
            println!("  TOTP: {}", secret(&login.totp));
            println!("  Notes: {}", login.notes.as_deref().unwrap_or("-"));
        }
        ItemPayload::SecureNote(note) => {
            println!("  Title: {}", note.title);
            println!("  Note: {}", secret(&Some(note.note.clone())));
        }
        ItemPayload::Card(card) => {
            println!("  Name: {}", card.name);
            println!("  Cardholder: {}", card.cardholder_name);
            println!("  Number: {}", secret(&Some(card.number.clone())));
            if let (Some(month), Some(year)) = (card.exp_month, card.exp_year) {
                println!("  Expires: {:02}/{}", month, year);
            }
            println!("  Code: {}", secret(&card.code));
            println!("  Notes: {}", card.notes.as_deref().unwrap_or("-"));
        }
    }
    Ok(())
}

/// Remove an item.
async fn cmd_remove(dir: &Path, id: &str) -> Result<()> {
    let id: ItemId = id.parse().context("Invalid item id")?;
    let mut vault = unlock(dir).await?;

    vault
        .replica
        .stage_delete(&id)
        .with_context(|| format!("Item {} not found", id))?;
    vault.commit(dir).await?;

    println!("Item removed: {}", id);
    Ok(())
}

/// Push and pull.
async fn cmd_sync(dir: &Path, full: bool) -> Result<()> {
    let mut vault = unlock(dir).await?;
    if full {
        vault.replica.reset_watermark();
    }
    vault.synchronize().await?;
    vault.save(dir).await?;

    println!("Synchronized {} items.", vault.replica.len());
    Ok(())
}

/// Change the master password.
async fn cmd_change_password(dir: &Path, strength: Option<&str>) -> Result<()> {
    info!("Changing master password");

    let new_params = strength.map(parse_strength).transpose()?;
    let mut vault = unlock(dir).await?;
    let old_password = prompt_password("Confirm current password: ")?;
    let new_password = prompt_new_password()?;

    let rotation = PasswordRotation::prepare(&vault.profile, &old_password, &new_password, new_params)
        .context("Current password is wrong")?;
    let response = vault
        .server
        .identity()
        .change_password(vault.profile.identity_id, rotation.request().clone())
        .await
        .context("Server rejected the password change")?;
    rotation.commit(&mut vault.profile, response);
    vault.save(dir).await?;

    println!("Password changed successfully!");
    Ok(())
}

/// Show identity and replica information.
async fn cmd_info(dir: &Path) -> Result<()> {
    let profile = ClientProfile::load(dir.join(PROFILE_FILE))
        .context("No profile found; run `keyhaven register` first")?;
    let replica = LocalReplica::load(dir.join(REPLICA_FILE))
        .await
        .context("Failed to load replica")?;

    println!("Identity Information:");
    println!("  ID: {}", profile.identity_id);
    println!("  Email: {}", profile.email);
    println!("  Password changed: {}", profile.last_password_change);
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", profile.kdf_params.memory_cost);
    println!("    Time: {} iterations", profile.kdf_params.time_cost);
    println!("    Parallelism: {}", profile.kdf_params.parallelism);
    println!("Replica:");
    println!("  Items: {}", replica.len());
    println!("  Pending changes: {}", replica.pending().len());
    match replica.watermark() {
        Some(watermark) => println!("  Last sync: {}", watermark),
        None => println!("  Last sync: never"),
    }

    Ok(())
}
