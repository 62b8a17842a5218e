//! End-to-end flows over a temporary vault.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use backoffice_action::approval::{
    ApprovalManager, ApprovalWatcher, ExpiryPolicy, NewApproval, EXPIRED_NOTE,
};
use backoffice_action::claim::ClaimManager;
use backoffice_action::dispatcher::ApprovalDispatcher;
use backoffice_action::error::ActionError;
use backoffice_action::handler::{ActionRegistry, MessageClient, MessageSendHandler};
use backoffice_action::rate_limit::RateLimiter;
use backoffice_action::types::SendReceipt;
use backoffice_core::audit::AuditLogger;
use backoffice_core::clock::{Clock, ManualClock};
use backoffice_core::frontmatter::{ApprovalRequest, Document};
use backoffice_core::types::{ApprovalStatus, AuditResult};
use backoffice_core::vault::{Folder, Vault};
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

struct MockClient {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl MockClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageClient for MockClient {
    async fn send(&self, to: &str, body: &str) -> Result<SendReceipt, ActionError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        if self.fail {
            return Err(ActionError::HandlerFailed("provider returned 500".to_string()));
        }
        Ok(SendReceipt {
            status: "sent".to_string(),
            message_id: "abc123".to_string(),
        })
    }
}

struct Env {
    _dir: TempDir,
    vault: Vault,
    clock: Arc<ManualClock>,
    audit: Arc<AuditLogger>,
    approvals: Arc<ApprovalManager>,
}

fn env() -> Env {
    let dir = TempDir::new().unwrap();
    let vault = Vault::new(dir.path());
    vault.ensure_layout().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    ));
    let audit = Arc::new(AuditLogger::new(&vault, clock.clone()));
    let approvals = Arc::new(ApprovalManager::new(
        vault.clone(),
        audit.clone(),
        ExpiryPolicy::new(Duration::hours(24)),
        clock.clone(),
    ));
    Env {
        _dir: dir,
        vault,
        clock,
        audit,
        approvals,
    }
}

fn move_to(path: &Path, vault: &Vault, folder: Folder) -> std::path::PathBuf {
    let dest = vault.path(folder).join(path.file_name().unwrap());
    fs::rename(path, &dest).unwrap();
    dest
}

#[test]
fn create_approval_lands_pending_with_default_expiry() {
    let env = env();
    let path = env
        .approvals
        .create_approval(
            NewApproval::new("email_send")
                .recipient("client@example.com")
                .reason("reply"),
        )
        .unwrap();

    assert_eq!(path.parent().unwrap(), env.vault.path(Folder::PendingApproval));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("APPROVAL_email_send_"));

    let request = ApprovalRequest::read(&path).unwrap();
    assert_eq!(request.status, ApprovalStatus::Pending);
    let created = request.created.unwrap();
    assert_eq!(request.expires.unwrap() - created, Duration::hours(24));

    let entry = &env.audit.recent(1).unwrap()[0];
    assert_eq!(entry.approval_status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn approved_request_is_sent_once_by_polling_dispatcher() {
    let env = env();
    let path = env
        .approvals
        .create_approval(
            NewApproval::new("email_send")
                .recipient("client@example.com")
                .reason("reply")
                .reply_body("Thanks, the invoice is attached."),
        )
        .unwrap();
    let approved = move_to(&path, &env.vault, Folder::Approved);
    let name = approved.file_name().unwrap().to_string_lossy().into_owned();

    let client = MockClient::new();
    let dispatcher = ApprovalDispatcher::new(
        env.vault.clone(),
        "email_send",
        client.clone(),
        env.audit.clone(),
    );
    let processed = dispatcher.process_pending().await;

    assert_eq!(processed, vec![name.clone()]);
    assert_eq!(
        client.sent(),
        vec![(
            "client@example.com".to_string(),
            "Thanks, the invoice is attached.".to_string()
        )]
    );
    assert!(!approved.exists());
    let done = env.vault.path(Folder::Done).join(&name);
    assert!(done.exists());
    assert_eq!(
        ApprovalRequest::read(&done).unwrap().status,
        ApprovalStatus::Approved
    );

    // Nothing left to send on the next cycle.
    assert!(dispatcher.process_pending().await.is_empty());
    assert_eq!(client.sent().len(), 1);
}

#[test]
fn second_agent_loses_claim_race() {
    let env = env();
    let claims = ClaimManager::for_vault(&env.vault, env.audit.clone());
    let item = env.vault.path(Folder::NeedsAction).join("TEST_item.md");
    fs::write(&item, "---\ntype: email\nstatus: pending\n---\n").unwrap();

    assert!(claims.claim(&item, "local"));
    assert!(!claims.claim(&item, "cloud"));

    let in_progress = env.vault.path(Folder::InProgress);
    assert!(in_progress.join("local").join("TEST_item.md").exists());
    assert!(!in_progress.join("cloud").join("TEST_item.md").exists());
    assert_eq!(claims.list_claims(None).len(), 1);
}

#[test]
fn past_due_request_is_auto_rejected() {
    let env = env();
    let path = env
        .approvals
        .create_approval(NewApproval::new("payment").recipient("Acme").amount(120.0))
        .unwrap();

    env.clock.advance(Duration::hours(25));
    let expired = env.approvals.check_expired().unwrap();
    assert_eq!(expired.len(), 1);
    assert!(!path.exists());
    assert_eq!(expired[0].parent().unwrap(), env.vault.path(Folder::Rejected));

    let doc = Document::read(&expired[0]).unwrap();
    assert!(doc.body.contains(EXPIRED_NOTE));
    assert_eq!(doc.front_matter.get_str("status").as_deref(), Some("expired"));

    let entries = env.audit.entries_on(env.clock.now().date_naive()).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.approval_status == ApprovalStatus::Expired));

    // A second sweep finds nothing new.
    assert!(env.approvals.check_expired().unwrap().is_empty());
    assert_eq!(env.vault.count(Folder::Rejected), 1);
}

#[test]
fn rate_limiter_allows_exactly_the_limit() {
    let limiter = RateLimiter::new([("social", 2)]);
    assert!(limiter.check("social"));
    assert!(limiter.check("social"));
    assert_eq!(limiter.remaining("social"), Some(0));
    assert!(!limiter.check("social"));
    assert!(limiter.check("unconfigured"));
}

#[tokio::test]
async fn dispatcher_ignores_other_action_types() {
    let env = env();
    let path = env
        .approvals
        .create_approval(
            NewApproval::new("email_send")
                .recipient("client@example.com")
                .reply_body("Hello"),
        )
        .unwrap();
    let approved = move_to(&path, &env.vault, Folder::Approved);

    let client = MockClient::new();
    let dispatcher = ApprovalDispatcher::new(
        env.vault.clone(),
        "whatsapp_reply",
        client.clone(),
        env.audit.clone(),
    );
    assert!(dispatcher.process_pending().await.is_empty());
    assert!(approved.exists());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn watcher_dispatches_approved_and_closes_rejected() {
    let env = env();
    let client = MockClient::new();
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(MessageSendHandler::new("email_send", client.clone())));
    let watcher = ApprovalWatcher::new(env.vault.clone(), env.approvals.clone(), env.audit.clone())
        .with_dispatcher(Arc::new(registry))
        .skip_actions(["whatsapp_reply"]);

    let send = env
        .approvals
        .create_approval(
            NewApproval::new("email_send")
                .recipient("client@example.com")
                .reply_body("Confirmed for Tuesday."),
        )
        .unwrap();
    let payment = env
        .approvals
        .create_approval(NewApproval::new("payment").recipient("Acme").amount(99.0))
        .unwrap();
    let polled = env
        .approvals
        .create_approval(
            NewApproval::new("whatsapp_reply")
                .recipient("Customer")
                .reply_body("On our way"),
        )
        .unwrap();
    move_to(&send, &env.vault, Folder::Approved);
    move_to(&payment, &env.vault, Folder::Rejected);
    let polled = move_to(&polled, &env.vault, Folder::Approved);

    let done = watcher.scan().await;
    assert_eq!(done.len(), 2);
    assert_eq!(client.sent().len(), 1);
    assert!(polled.exists());
    assert_eq!(env.vault.count(Folder::Done), 2);

    for path in &done {
        let request = ApprovalRequest::read(path).unwrap();
        match request.action.as_str() {
            "email_send" => assert_eq!(request.status, ApprovalStatus::Approved),
            "payment" => assert_eq!(request.status, ApprovalStatus::Rejected),
            other => panic!("unexpected action {other}"),
        }
    }
}

#[tokio::test]
async fn watcher_moves_to_done_even_when_dispatch_fails() {
    let env = env();
    let client = MockClient::failing();
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(MessageSendHandler::new("email_send", client.clone())));
    let watcher = ApprovalWatcher::new(env.vault.clone(), env.approvals.clone(), env.audit.clone())
        .with_dispatcher(Arc::new(registry));

    let path = env
        .approvals
        .create_approval(
            NewApproval::new("email_send")
                .recipient("client@example.com")
                .reply_body("Hi"),
        )
        .unwrap();
    move_to(&path, &env.vault, Folder::Approved);

    let done = watcher.scan().await;
    assert_eq!(done.len(), 1);
    let failure = env
        .audit
        .recent(10)
        .unwrap()
        .into_iter()
        .find(|e| e.action_type == "email_send")
        .unwrap();
    assert_eq!(failure.result, AuditResult::Failure);
    assert!(failure.error.unwrap().contains("provider returned 500"));
}

/// System-written statuses must agree with the folder holding the file.
/// Human moves into `Approved/` or `Rejected/` leave `pending` behind until
/// the watcher processes them, so those folders only forbid mismatches the
/// system itself could have written.
fn assert_status_matches_folder(vault: &Vault) {
    for folder in [
        Folder::PendingApproval,
        Folder::Approved,
        Folder::Rejected,
        Folder::Done,
    ] {
        for path in vault.list_markdown(folder, "APPROVAL_").unwrap() {
            let status = ApprovalRequest::read(&path).unwrap().status;
            let allowed = match folder {
                Folder::PendingApproval => status == ApprovalStatus::Pending,
                Folder::Approved => status == ApprovalStatus::Pending,
                Folder::Rejected => {
                    matches!(status, ApprovalStatus::Pending | ApprovalStatus::Expired)
                }
                _ => status != ApprovalStatus::Pending,
            };
            assert!(allowed, "{} with status {} in {}", path.display(), status, folder);
        }
    }
}

#[tokio::test]
async fn lifecycle_keeps_status_and_folder_in_agreement() {
    let env = env();
    let client = MockClient::new();
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(MessageSendHandler::new("email_send", client.clone())));
    let watcher = ApprovalWatcher::new(env.vault.clone(), env.approvals.clone(), env.audit.clone())
        .with_dispatcher(Arc::new(registry));

    let approve = env
        .approvals
        .create_approval(
            NewApproval::new("email_send")
                .recipient("client@example.com")
                .reply_body("See you Tuesday."),
        )
        .unwrap();
    let reject = env
        .approvals
        .create_approval(NewApproval::new("payment").recipient("Acme").amount(40.0))
        .unwrap();
    env.approvals
        .create_approval(NewApproval::new("social_post").recipient("linkedin"))
        .unwrap();
    assert_status_matches_folder(&env.vault);

    move_to(&approve, &env.vault, Folder::Approved);
    move_to(&reject, &env.vault, Folder::Rejected);
    assert_status_matches_folder(&env.vault);

    env.clock.advance(Duration::hours(25));
    let expired = env.approvals.check_expired().unwrap();
    assert_eq!(expired.len(), 1);
    assert_status_matches_folder(&env.vault);

    assert_eq!(watcher.scan().await.len(), 2);
    assert_status_matches_folder(&env.vault);

    env.approvals.process_rejected(&expired[0]).unwrap();
    assert_status_matches_folder(&env.vault);

    let mut statuses: Vec<String> = env
        .vault
        .list_markdown(Folder::Done, "APPROVAL_")
        .unwrap()
        .iter()
        .map(|p| ApprovalRequest::read(p).unwrap().status.to_string())
        .collect();
    statuses.sort();
    assert_eq!(statuses, vec!["approved", "expired", "rejected"]);
    assert_eq!(env.vault.count(Folder::PendingApproval), 0);
    assert_eq!(env.vault.count(Folder::Approved), 0);
    assert_eq!(env.vault.count(Folder::Rejected), 0);
    assert_eq!(client.sent().len(), 1);
}

#[test]
fn two_agents_sweeping_expire_each_request_once() {
    let env = env();
    for i in 0..4 {
        env.approvals
            .create_approval(NewApproval::new("email_send").recipient(format!("c{i}@example.com")))
            .unwrap();
    }
    env.clock.advance(Duration::hours(25));
    let cloud = Arc::new(ApprovalManager::new(
        env.vault.clone(),
        env.audit.clone(),
        ExpiryPolicy::new(Duration::hours(24)),
        env.clock.clone(),
    ));

    let handles: Vec<_> = [env.approvals.clone(), cloud]
        .into_iter()
        .map(|manager| std::thread::spawn(move || manager.check_expired().unwrap().len()))
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(total, 4);
    assert_eq!(env.vault.count(Folder::Rejected), 4);
    let expired_events = env
        .audit
        .entries_on(env.clock.now().date_naive())
        .unwrap()
        .into_iter()
        .filter(|e| e.approval_status == ApprovalStatus::Expired)
        .count();
    assert_eq!(expired_events, 4);
}
