use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as ParkingMutex;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, Settings};
use crate::error::DownloadError;
use crate::metadata::{Lookup, MetadataClient, WorkshopItem};
use crate::progress::{self, ProgressSnapshot};
use crate::relocate::{self, ContentType};
use crate::steamcmd;

/// Identifier of a workshop item: decimal digits only. Whether the id names a
/// real item is confirmed by the metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkshopId(String);

impl WorkshopId {
    pub fn parse(value: &str) -> Result<Self, DownloadError> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DownloadError::InvalidWorkshopId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkshopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub workshop_id: WorkshopId,
    pub destination_folder: PathBuf,
}

impl DownloadRequest {
    pub fn new(workshop_id: WorkshopId, destination_folder: PathBuf) -> Self {
        Self {
            workshop_id,
            destination_folder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Queued => "Queued",
            SessionStatus::Running => "Running",
            SessionStatus::Succeeded => "Succeeded",
            SessionStatus::Failed => "Failed",
            SessionStatus::Canceled => "Canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Queued | SessionStatus::Running)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub id: Uuid,
    pub workshop_id: WorkshopId,
    pub status: SessionStatus,
    pub item: WorkshopItem,
    pub installed_path: Option<PathBuf>,
    pub content_type: Option<ContentType>,
    pub failed_copies: Vec<PathBuf>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status(SessionStatus),
    Progress(ProgressSnapshot),
    LogLine(String),
    Completed(DownloadSummary),
    Failed(String),
}

/// Caller-side handle for one download session. Cancellation flows through
/// the session's own token; it never touches other sessions or unrelated
/// processes.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub workshop_id: WorkshopId,
    pub item: WorkshopItem,
    status_rx: watch::Receiver<SessionStatus>,
    progress_rx: watch::Receiver<Option<ProgressSnapshot>>,
    events_rx: ParkingMutex<Option<mpsc::Receiver<SessionEvent>>>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    pub fn status_receiver(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    pub fn progress_receiver(&self) -> watch::Receiver<Option<ProgressSnapshot>> {
        self.progress_rx.clone()
    }

    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.lock().take()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

pub struct WorkshopService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: RwLock<Config>,
    config_path: PathBuf,
    metadata: MetadataClient,
    // one download session at a time
    slot: Arc<Semaphore>,
}

struct SessionRuntime {
    id: Uuid,
    request: DownloadRequest,
    settings: Settings,
    item: WorkshopItem,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: mpsc::Sender<SessionEvent>,
    cancel_token: CancellationToken,
    service: Arc<ServiceInner>,
}

impl WorkshopService {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self::with_metadata_client(config, config_path, MetadataClient::default())
    }

    pub fn with_metadata_client(
        config: Config,
        config_path: PathBuf,
        metadata: MetadataClient,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config: RwLock::new(config),
                config_path,
                metadata,
                slot: Arc::new(Semaphore::new(1)),
            }),
        }
    }

    pub async fn settings(&self) -> Settings {
        self.inner.config.read().await.settings.clone()
    }

    pub async fn update_settings(&self, settings: Settings) {
        self.inner.config.write().await.settings = settings;
    }

    /// Validates the request and the workshop item, then starts the session
    /// worker. Every rejection here happens before any external process is
    /// spawned. Only one session may be active at a time.
    pub async fn start(&self, request: DownloadRequest) -> Result<SessionHandle, DownloadError> {
        let permit = self
            .inner
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| DownloadError::SessionActive)?;

        if request.destination_folder.as_os_str().is_empty() {
            return Err(DownloadError::MissingDestination);
        }

        let settings = self.inner.config.read().await.settings.clone();
        if !steamcmd::is_installed(&settings.steamcmd_dir) {
            return Err(DownloadError::SteamCmdMissing(
                steamcmd::executable(&settings.steamcmd_dir),
            ));
        }

        let item = match self.inner.metadata.lookup(&request.workshop_id).await? {
            Lookup::Valid(item) => item,
            Lookup::Invalid => {
                return Err(DownloadError::UnknownWorkshopId(
                    request.workshop_id.to_string(),
                ))
            }
        };

        let session_id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Queued);
        let (progress_tx, progress_rx) = watch::channel::<Option<ProgressSnapshot>>(None);
        let (events_tx, events_rx) = mpsc::channel(128);
        let cancel_token = CancellationToken::new();

        let session = Arc::new(SessionRuntime {
            id: session_id,
            request: request.clone(),
            settings,
            item: item.clone(),
            status_tx,
            events_tx,
            cancel_token: cancel_token.clone(),
            service: self.inner.clone(),
        });

        tokio::spawn(async move {
            if let Err(error) = run_session(session, progress_tx).await {
                debug!("session ended with error: {error}");
            }
            drop(permit);
        });

        Ok(SessionHandle {
            id: session_id,
            workshop_id: request.workshop_id,
            item,
            status_rx,
            progress_rx,
            events_rx: ParkingMutex::new(Some(events_rx)),
            cancel_token,
        })
    }
}

async fn run_session(
    session: Arc<SessionRuntime>,
    progress_tx: watch::Sender<Option<ProgressSnapshot>>,
) -> Result<(), DownloadError> {
    info!(
        "starting download session {} for workshop item {}",
        session.id, session.request.workshop_id
    );
    session.status_tx.send_replace(SessionStatus::Running);
    session
        .events_tx
        .send(SessionEvent::Status(SessionStatus::Running))
        .await
        .ok();

    let result = execute_session(session.clone(), progress_tx).await;

    // the paths in use are persisted after every session, success or failure
    persist_config(&session).await;

    match result {
        Ok(summary) => {
            session.status_tx.send_replace(SessionStatus::Succeeded);
            session
                .events_tx
                .send(SessionEvent::Completed(summary))
                .await
                .ok();
            info!("download session {} succeeded", session.id);
            Ok(())
        }
        Err(error) => {
            let status = if matches!(error, DownloadError::Canceled) {
                SessionStatus::Canceled
            } else {
                SessionStatus::Failed
            };
            session.status_tx.send_replace(status);
            let event = if status == SessionStatus::Canceled {
                SessionEvent::Status(SessionStatus::Canceled)
            } else {
                SessionEvent::Failed(error.to_string())
            };
            session.events_tx.send(event).await.ok();
            if status == SessionStatus::Canceled {
                warn!("download session {} canceled", session.id);
            } else {
                error!("download session {} failed: {error}", session.id);
            }
            Err(error)
        }
    }
}

async fn execute_session(
    session: Arc<SessionRuntime>,
    progress_tx: watch::Sender<Option<ProgressSnapshot>>,
) -> Result<DownloadSummary, DownloadError> {
    let id = &session.request.workshop_id;
    let steamcmd_dir = &session.settings.steamcmd_dir;

    let download_folder = steamcmd::download_dir(steamcmd_dir, id);
    fs::create_dir_all(&download_folder)
        .await
        .map_err(|source| DownloadError::Io { source })?;

    // monitor gets a child token so completion stops it without touching the
    // session's own cancellation state
    let monitor_token = session.cancel_token.child_token();
    let progress_rx = progress_tx.subscribe();
    let monitor = tokio::spawn(progress::monitor(
        download_folder,
        session.item.size_bytes,
        progress_tx,
        monitor_token.clone(),
    ));
    forward_progress(progress_rx, session.events_tx.clone());

    let invocation = invoke_steamcmd(&session).await;
    monitor_token.cancel();
    monitor
        .await
        .map_err(|source| DownloadError::Join { source })?;
    invocation?;

    let content_folder = steamcmd::content_dir(steamcmd_dir, id);
    let destination = session.request.destination_folder.clone();
    let report =
        tokio::task::spawn_blocking(move || relocate::relocate(&content_folder, &destination))
            .await
            .map_err(|source| DownloadError::Join { source })??;

    if !report.is_complete() {
        warn!(
            "session {}: {} file(s) failed to copy",
            session.id,
            report.failed.len()
        );
    }

    Ok(DownloadSummary {
        id: session.id,
        workshop_id: id.clone(),
        status: SessionStatus::Succeeded,
        item: session.item.clone(),
        installed_path: Some(report.target),
        content_type: Some(report.content_type),
        failed_copies: report.failed,
        completed_at: Utc::now(),
    })
}

/// Runs SteamCMD to completion, streaming its combined output. A cancel
/// request kills this exact child process and nothing else.
async fn invoke_steamcmd(session: &SessionRuntime) -> Result<(), DownloadError> {
    let exe = steamcmd::executable(&session.settings.steamcmd_dir);
    let mut command = steamcmd::build_command(&exe, &session.request.workshop_id);
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|source| DownloadError::Spawn { source })?;
    let stdout = child.stdout.take().ok_or_else(|| DownloadError::Spawn {
        source: std::io::Error::new(std::io::ErrorKind::Other, "missing stdout"),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| DownloadError::Spawn {
        source: std::io::Error::new(std::io::ErrorKind::Other, "missing stderr"),
    })?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut output_buffer = String::new();

    while !(stdout_done && stderr_done) {
        tokio::select! {
            _ = session.cancel_token.cancelled() => {
                warn!("cancel request received for session {}", session.id);
                terminate_child(&mut child).await?;
                return Err(DownloadError::Canceled);
            }
            line = stdout_lines.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => handle_output_line(session, &line, &mut output_buffer).await,
                    Ok(None) => stdout_done = true,
                    Err(source) => return Err(DownloadError::Io { source }),
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => handle_output_line(session, &line, &mut output_buffer).await,
                    Ok(None) => stderr_done = true,
                    Err(source) => return Err(DownloadError::Io { source }),
                }
            }
        }
    }

    let status = tokio::select! {
        _ = session.cancel_token.cancelled() => {
            terminate_child(&mut child).await?;
            return Err(DownloadError::Canceled);
        }
        status = child.wait() => status.map_err(|source| DownloadError::Io { source })?,
    };

    if !status.success() {
        return Err(DownloadError::CommandFailed {
            status: status.code(),
            output: output_buffer,
        });
    }
    Ok(())
}

async fn handle_output_line(session: &SessionRuntime, line: &str, buffer: &mut String) {
    debug!("steamcmd: {line}");
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(line);
    session
        .events_tx
        .send(SessionEvent::LogLine(line.to_string()))
        .await
        .ok();
}

fn forward_progress(
    mut progress_rx: watch::Receiver<Option<ProgressSnapshot>>,
    events_tx: mpsc::Sender<SessionEvent>,
) {
    tokio::spawn(async move {
        // ends when the monitor drops its sender
        while progress_rx.changed().await.is_ok() {
            let snapshot = progress_rx.borrow().clone();
            if let Some(snapshot) = snapshot {
                events_tx.send(SessionEvent::Progress(snapshot)).await.ok();
            }
        }
    });
}

async fn terminate_child(child: &mut Child) -> Result<(), DownloadError> {
    #[cfg(windows)]
    {
        child
            .kill()
            .await
            .map_err(|source| DownloadError::Io { source })?;
    }
    #[cfg(not(windows))]
    {
        child
            .start_kill()
            .map_err(|source| DownloadError::Io { source })?;
    }
    Ok(())
}

async fn persist_config(session: &SessionRuntime) {
    let settings = Settings {
        steamcmd_dir: session.settings.steamcmd_dir.clone(),
        destination_folder: session.request.destination_folder.clone(),
    };
    let config = {
        let mut guard = session.service.config.write().await;
        guard.settings = settings;
        guard.clone()
    };
    let path = session.service.config_path.clone();
    let saved = tokio::task::spawn_blocking(move || config.save(&path)).await;
    match saved {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!("failed to persist config: {error}"),
        Err(error) => warn!("config save task failed: {error}"),
    }
}


#[cfg(all(test, unix))]
mod service_tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::config::Settings;

    const ITEM_PAGE: &str = r#"
        <div class="workshopItemTitle">Test Item</div>
        <div class="rightDetailsBlock">Mod</div>
        <div class="detailsStatRight">1 MB</div>
        <div class="fileRatingDetails"><img src="https://img.example/stars.png"></div>
    "#;

    fn install_fake_steamcmd(dir: &Path, script_body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let exe = steamcmd::executable(dir);
        std::fs::write(&exe, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        let mut perms = std::fs::metadata(&exe).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&exe, perms).unwrap();
    }

    fn seed_content(steamcmd_dir: &Path, id: &WorkshopId) {
        let content = steamcmd::content_dir(steamcmd_dir, id);
        std::fs::create_dir_all(&content).unwrap();
        std::fs::write(
            content.join(relocate::DESCRIPTOR_FILE_NAME),
            r#"{"Type": "mod", "FolderName": "test_item"}"#,
        )
        .unwrap();
        std::fs::write(content.join("core.ff"), b"payload").unwrap();
    }

    async fn service_with_mock_page(
        steamcmd_dir: &Path,
        config_path: &Path,
    ) -> (WorkshopService, mockito::ServerGuard) {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/\?id=\d+$".to_string()))
            .with_status(200)
            .with_body(ITEM_PAGE)
            .create_async()
            .await;

        let config = Config {
            settings: Settings {
                steamcmd_dir: steamcmd_dir.to_path_buf(),
                destination_folder: PathBuf::new(),
            },
        };
        let metadata = MetadataClient::with_base_url(reqwest::Client::new(), server.url());
        let service =
            WorkshopService::with_metadata_client(config, config_path.to_path_buf(), metadata);
        (service, server)
    }

    #[tokio::test]
    async fn rejects_empty_destination_before_spawn() {
        let steamcmd = tempfile::tempdir().unwrap();
        let (service, _server) =
            service_with_mock_page(steamcmd.path(), &steamcmd.path().join("config.toml")).await;

        let request = DownloadRequest::new(WorkshopId::parse("111").unwrap(), PathBuf::new());
        assert!(matches!(
            service.start(request).await.unwrap_err(),
            DownloadError::MissingDestination
        ));
    }

    #[tokio::test]
    async fn rejects_when_steamcmd_missing() {
        let steamcmd = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let (service, _server) =
            service_with_mock_page(steamcmd.path(), &steamcmd.path().join("config.toml")).await;

        let request = DownloadRequest::new(
            WorkshopId::parse("111").unwrap(),
            dest.path().to_path_buf(),
        );
        assert!(matches!(
            service.start(request).await.unwrap_err(),
            DownloadError::SteamCmdMissing(_)
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_workshop_id_before_spawn() {
        let steamcmd = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        install_fake_steamcmd(steamcmd.path(), "exit 0");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/\?id=\d+$".to_string()))
            .with_status(200)
            .with_body("<html>deleted item</html>")
            .create_async()
            .await;

        let config = Config {
            settings: Settings {
                steamcmd_dir: steamcmd.path().to_path_buf(),
                destination_folder: PathBuf::new(),
            },
        };
        let metadata = MetadataClient::with_base_url(reqwest::Client::new(), server.url());
        let service = WorkshopService::with_metadata_client(
            config,
            steamcmd.path().join("config.toml"),
            metadata,
        );

        let request = DownloadRequest::new(
            WorkshopId::parse("999").unwrap(),
            dest.path().to_path_buf(),
        );
        assert!(matches!(
            service.start(request).await.unwrap_err(),
            DownloadError::UnknownWorkshopId(_)
        ));
    }

    #[tokio::test]
    async fn successful_session_relocates_and_saves_config() {
        let steamcmd = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let config_path = steamcmd.path().join("config.toml");
        let id = WorkshopId::parse("12345").unwrap();

        install_fake_steamcmd(steamcmd.path(), "exit 0");
        seed_content(steamcmd.path(), &id);
        let (service, _server) = service_with_mock_page(steamcmd.path(), &config_path).await;

        let request = DownloadRequest::new(id.clone(), dest.path().to_path_buf());
        let handle = service.start(request).await.unwrap();
        assert_eq!(handle.item.name, "Test Item");

        let mut status_rx = handle.status_receiver();
        let status = tokio::time::timeout(
            Duration::from_secs(10),
            status_rx.wait_for(|s| s.is_terminal()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(*status, SessionStatus::Succeeded);

        let mut events = handle.take_events().unwrap();
        let mut summary = None;
        while let Some(event) = events.recv().await {
            if let SessionEvent::Completed(s) = event {
                summary = Some(s);
                break;
            }
        }
        let summary = summary.expect("completed event");
        let expected_target = dest.path().join("mods").join("test_item").join("zone");
        assert_eq!(
            summary.installed_path.as_deref(),
            Some(expected_target.as_path())
        );
        assert_eq!(summary.content_type, Some(ContentType::Mod));
        assert!(summary.failed_copies.is_empty());
        assert!(expected_target.join("core.ff").exists());

        // config persisted with the session's paths
        let (saved, _) = Config::load_or_default(Some(&config_path)).unwrap();
        assert_eq!(saved.settings.destination_folder, dest.path());
    }

    #[tokio::test]
    async fn failing_downloader_reports_command_failure() {
        let steamcmd = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        install_fake_steamcmd(steamcmd.path(), "echo boom\nexit 1");
        let (service, _server) =
            service_with_mock_page(steamcmd.path(), &steamcmd.path().join("config.toml")).await;

        let request = DownloadRequest::new(
            WorkshopId::parse("222").unwrap(),
            dest.path().to_path_buf(),
        );
        let handle = service.start(request).await.unwrap();

        let mut status_rx = handle.status_receiver();
        let status = tokio::time::timeout(
            Duration::from_secs(10),
            status_rx.wait_for(|s| s.is_terminal()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(*status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn second_session_is_rejected_while_one_is_active() {
        let steamcmd = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        install_fake_steamcmd(steamcmd.path(), "sleep 30");
        let (service, _server) =
            service_with_mock_page(steamcmd.path(), &steamcmd.path().join("config.toml")).await;

        let first = DownloadRequest::new(
            WorkshopId::parse("333").unwrap(),
            dest.path().to_path_buf(),
        );
        let handle = service.start(first.clone()).await.unwrap();

        assert!(matches!(
            service.start(first).await.unwrap_err(),
            DownloadError::SessionActive
        ));
        handle.cancel();
    }

    #[tokio::test]
    async fn cancel_kills_child_and_leaves_service_resettable() {
        let steamcmd = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let id = WorkshopId::parse("444").unwrap();
        install_fake_steamcmd(steamcmd.path(), "sleep 30");
        let (service, _server) =
            service_with_mock_page(steamcmd.path(), &steamcmd.path().join("config.toml")).await;

        let request = DownloadRequest::new(id.clone(), dest.path().to_path_buf());
        let handle = service.start(request).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();

        let mut status_rx = handle.status_receiver();
        let status = tokio::time::timeout(
            Duration::from_secs(10),
            status_rx.wait_for(|s| s.is_terminal()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(*status, SessionStatus::Canceled);

        // the slot is released; a subsequent start is permitted
        install_fake_steamcmd(steamcmd.path(), "exit 0");
        seed_content(steamcmd.path(), &id);
        let mut waits = 0;
        let retry = loop {
            let retry = DownloadRequest::new(id.clone(), dest.path().to_path_buf());
            match service.start(retry).await {
                Ok(handle) => break handle,
                Err(DownloadError::SessionActive) if waits < 50 => {
                    waits += 1;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(error) => panic!("unexpected error on retry: {error}"),
            }
        };
        drop(retry);
    }
}
