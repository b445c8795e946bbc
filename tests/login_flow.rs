//! End-to-end login flows over the file-backed store and event log.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use gatekeeper::guard::{
    AuthError, Authenticator, CredentialVerifier, FileEventWriter, FileStore, GuardConfig,
    LoginRequest, ManualClock, RateLimiter, RequestContext, SecurityEvent, SecurityLog,
    SessionStatus, UserDirectory, UserRecord,
};
use secrecy::SecretString;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tempfile::TempDir;

struct OneUser(UserRecord);

#[async_trait]
impl UserDirectory for OneUser {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok((self.0.email == email).then(|| self.0.clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok((self.0.id == id).then(|| self.0.clone()))
    }
}

#[derive(Default)]
struct PlainVerifier {
    calls: AtomicUsize,
}

impl CredentialVerifier for PlainVerifier {
    fn verify(&self, stored_hash: &str, supplied_secret: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        stored_hash == supplied_secret
    }
}

struct Fixture {
    _dir: TempDir,
    store_path: std::path::PathBuf,
    log_path: std::path::PathBuf,
    clock: Arc<ManualClock>,
    verifier: Arc<PlainVerifier>,
    auth: Authenticator,
}

fn fixture(config: GuardConfig) -> Result<Fixture> {
    let dir = TempDir::new()?;
    let store_path = dir.path().join("state").join("limits.json");
    let log_path = dir.path().join("logs").join("security.log");

    let clock = Arc::new(ManualClock::new(0));
    let log = Arc::new(SecurityLog::new(Arc::new(FileEventWriter::open(&log_path)?)));
    let limiter = RateLimiter::new(
        config,
        Arc::new(FileStore::new(store_path.clone())),
        Arc::clone(&log),
        clock.clone(),
    );
    let verifier = Arc::new(PlainVerifier::default());
    let user = OneUser(UserRecord {
        id: "user-7".to_string(),
        email: "a@x.com".to_string(),
        display_name: "A".to_string(),
        password_hash: "hunter2".to_string(),
    });
    let auth = Authenticator::new(limiter, Arc::new(user), verifier.clone(), log);

    Ok(Fixture {
        _dir: dir,
        store_path,
        log_path,
        clock,
        verifier,
        auth,
    })
}

fn login(password: &str) -> LoginRequest {
    LoginRequest {
        email: "a@x.com".to_string(),
        password: SecretString::from(password.to_string()),
    }
}

fn read_events(path: &Path) -> Result<Vec<SecurityEvent>> {
    std::fs::read_to_string(path)?
        .lines()
        .map(|line| serde_json::from_str(line).map_err(|err| anyhow!("bad line {line}: {err}")))
        .collect()
}

#[tokio::test]
async fn limiter_scenario_over_file_store() -> Result<()> {
    let f = fixture(GuardConfig::new())?;
    let limiter = f.auth.limiter();
    let identifier = "a@x.com|1.2.3.4";

    for t in 0..5 {
        f.clock.set(t);
        limiter.record_attempt(identifier).await;
    }

    f.clock.set(5);
    let decision = limiter.check(identifier).await;
    assert!(!decision.allowed);
    assert!(decision.locked);
    assert_eq!(decision.reset_time, 904);

    f.clock.set(905);
    let decision = limiter.check(identifier).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 5);

    let stored = std::fs::read_to_string(&f.store_path)?;
    assert!(!stored.contains("a@x.com"));
    assert!(!stored.contains("1.2.3.4"));
    Ok(())
}

#[tokio::test]
async fn lockout_survives_restart_of_the_limiter() -> Result<()> {
    let f = fixture(GuardConfig::new())?;
    let context = RequestContext::new("1.2.3.4");
    for _ in 0..5 {
        let result = f.auth.login(login("wrong"), &context).await;
        assert_eq!(result.err(), Some(AuthError::InvalidCredentials));
    }

    // A second limiter over the same file sees the lock.
    let log = Arc::new(SecurityLog::new(Arc::new(FileEventWriter::open(&f.log_path)?)));
    let restarted = RateLimiter::new(
        GuardConfig::new(),
        Arc::new(FileStore::new(f.store_path.clone())),
        log,
        f.clock.clone(),
    );
    let decision = restarted.check("a@x.com|1.2.3.4").await;
    assert!(decision.locked);
    Ok(())
}

#[tokio::test]
async fn locked_login_never_reaches_the_verifier() -> Result<()> {
    let f = fixture(GuardConfig::new().with_max_attempts(3))?;
    let context = RequestContext::new("1.2.3.4");
    for _ in 0..3 {
        let _ = f.auth.login(login("wrong"), &context).await;
    }
    assert_eq!(f.verifier.calls.load(Ordering::SeqCst), 3);

    for _ in 0..10 {
        let result = f.auth.login(login("hunter2"), &context).await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }
    assert_eq!(f.verifier.calls.load(Ordering::SeqCst), 3);

    f.clock.advance(GuardConfig::new().lockout_seconds() + 1);
    let outcome = f.auth.login(login("hunter2"), &context).await?;
    assert_eq!(outcome.user.id, "user-7");
    Ok(())
}

#[tokio::test]
async fn audit_trail_records_the_whole_flow() -> Result<()> {
    let f = fixture(GuardConfig::new())?;
    let home = RequestContext::new("1.2.3.4").with_user_agent(Some("browser/1".to_string()));

    let _ = f.auth.login(login("wrong"), &home).await;
    let outcome = f.auth.login(login("hunter2"), &home).await?;

    let elsewhere = RequestContext::new("5.6.7.8");
    let status = f
        .auth
        .check_session(Some(&outcome.token), &elsewhere)
        .await;
    assert!(matches!(
        status,
        SessionStatus::Authenticated { anomaly: true, .. }
    ));

    let cookie = f.auth.logout(Some(&outcome.token), &home).await;
    assert!(cookie.contains("Max-Age=0"));

    let events = read_events(&f.log_path)?;
    let kinds: Vec<&str> = events.iter().map(|e| e.event_kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["failed_login", "login_success", "suspicious_activity", "logout"]
    );

    let suspicious = events
        .iter()
        .find(|e| e.event_kind.as_str() == "suspicious_activity")
        .context("missing suspicious_activity")?;
    assert_eq!(suspicious.actor, "user-7");
    assert_eq!(suspicious.origin_address, "5.6.7.8");

    let failed = &events[0];
    assert_eq!(failed.actor, "guest");
    assert_eq!(failed.user_agent, "browser/1");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_are_all_recorded() -> Result<()> {
    let f = fixture(GuardConfig::new().with_max_attempts(100))?;
    let auth = Arc::new(f.auth);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let auth = Arc::clone(&auth);
        handles.push(tokio::spawn(async move {
            auth.login(login("wrong"), &RequestContext::new("1.2.3.4"))
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await?.err(), Some(AuthError::InvalidCredentials));
    }

    let record = auth
        .limiter()
        .inspect("a@x.com|1.2.3.4")
        .await?
        .context("record missing")?;
    assert_eq!(record.attempts.len(), 20);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limiters_sharing_one_store_file_keep_every_attempt() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("limits.json");
    let config = GuardConfig::new()
        .with_max_attempts(100)
        .with_store_timeout(std::time::Duration::from_secs(10));
    let log = Arc::new(SecurityLog::new(Arc::new(FileEventWriter::open(
        &dir.path().join("security.log"),
    )?)));

    let limiters: Vec<Arc<RateLimiter>> = (0..2)
        .map(|_| {
            Arc::new(RateLimiter::new(
                config.clone(),
                Arc::new(FileStore::new(path.clone())),
                Arc::clone(&log),
                Arc::new(ManualClock::new(0)),
            ))
        })
        .collect();

    let mut handles = Vec::new();
    for n in 0..20 {
        let limiter = Arc::clone(&limiters[n % 2]);
        handles.push(tokio::spawn(async move {
            limiter.record_attempt("a@x.com|1.2.3.4").await
        }));
    }
    for handle in handles {
        assert!(handle.await?.allowed);
    }

    let record = limiters[0]
        .inspect("a@x.com|1.2.3.4")
        .await?
        .context("record missing")?;
    assert_eq!(record.attempts.len(), 20);
    Ok(())
}
