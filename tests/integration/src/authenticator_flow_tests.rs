//! End-to-end register and unlock flows through the authenticator
//!
//! # Test Scenarios
//!
//! 1. **Register/Unlock**: a secret protected at registration is recovered on unlock
//! 2. **Dismissal**: a user cancel reaches the app and frees the authenticator
//! 3. **Enrollment Change**: unlock fails with "not available" and the key is dropped
//! 4. **Cancel From Another Thread**: app cancel beats a slow platform success
//! 5. **Configuration**: key options flow from a TOML file into the request
//! 6. **Abandoned Prompt**: a prompt dropped without a result frees the authenticator

use crate::test_utils::{
    init_tracing, software_custodian, FakePrompt, Notification, PromptBehavior,
    RecordingCallback,
};
use keyward_biometry::{
    AuthenticationRequest, BiometricAuthenticator, ErrorCode, SerialDispatcher, SoftwareKeyStore,
    SoftwareKeyStoreProvider,
};
use keyward_core::Config;
use std::sync::Arc;
use std::thread;

struct Harness {
    provider: SoftwareKeyStoreProvider,
    dispatcher: SerialDispatcher,
    prompt: Arc<FakePrompt>,
    authenticator: BiometricAuthenticator<SoftwareKeyStore>,
}

impl Harness {
    fn new(behavior: PromptBehavior) -> Self {
        init_tracing();
        let provider = SoftwareKeyStoreProvider::default();
        let dispatcher = SerialDispatcher::new("flow-test");
        let prompt = FakePrompt::new(behavior);
        let authenticator = BiometricAuthenticator::new(
            software_custodian(&provider),
            Arc::new(dispatcher.clone()),
            prompt.clone(),
        );
        Self {
            provider,
            dispatcher,
            prompt,
            authenticator,
        }
    }

    async fn run(&self, request: AuthenticationRequest) -> Arc<RecordingCallback> {
        let callback = RecordingCallback::new();
        self.authenticator
            .authenticate(request, callback.clone())
            .unwrap();
        self.dispatcher.flush().await;
        callback
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_then_unlock_round_trip() {
    let h = Harness::new(PromptBehavior::Accept);

    let registered = h
        .run(AuthenticationRequest::register(b"correct horse battery staple".to_vec()))
        .await
        .single_success();
    assert!(registered.is_new_key());
    assert!(h.authenticator.has_biometry_key());

    let unlocked = h
        .run(AuthenticationRequest::unlock(registered.data_to_save().to_vec()))
        .await
        .single_success();
    assert!(!unlocked.is_new_key());
    assert_eq!(unlocked.derived_data(), b"correct horse battery staple");
    assert_eq!(h.prompt.shown(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dismissed_prompt_frees_authenticator() {
    let h = Harness::new(PromptBehavior::Dismiss);

    let callback = h
        .run(AuthenticationRequest::register(b"secret".to_vec()))
        .await;
    assert_eq!(
        callback.outcomes(),
        vec![Notification::Cancelled { user_initiated: true }]
    );
    assert!(!h.authenticator.is_authenticating());

    // Registration created the key before the prompt was shown.
    assert!(h.authenticator.has_biometry_key());
    h.prompt.set_behavior(PromptBehavior::Accept);
    h.run(AuthenticationRequest::register(b"secret".to_vec()))
        .await
        .single_success();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enrollment_change_drops_key_on_unlock() {
    let h = Harness::new(PromptBehavior::Accept);
    let registered = h
        .run(AuthenticationRequest::register(b"pin-1234".to_vec()))
        .await
        .single_success();

    h.provider.simulate_enrollment_change();

    let callback = h
        .run(AuthenticationRequest::unlock(registered.data_to_save().to_vec()))
        .await;
    match callback.outcomes().as_slice() {
        [Notification::Failed(err)] => {
            assert_eq!(err.code, ErrorCode::BiometryNotAvailable);
            assert_eq!(err.code.as_i32(), 18);
        }
        other => panic!("unexpected outcomes {:?}", other),
    }
    assert!(!h.authenticator.has_biometry_key());
    assert_eq!(h.prompt.shown(), 1);

    // A fresh registration works again afterwards.
    let again = h
        .run(AuthenticationRequest::register(b"pin-1234".to_vec()))
        .await
        .single_success();
    assert_ne!(again.data_to_save(), registered.data_to_save());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn app_cancel_from_another_thread_beats_late_success() {
    let h = Harness::new(PromptBehavior::Park);
    let callback = RecordingCallback::new();
    let handle = h
        .authenticator
        .authenticate(
            AuthenticationRequest::register(b"secret".to_vec()),
            callback.clone(),
        )
        .unwrap();
    let session = h.prompt.take();

    thread::spawn(move || handle.cancel()).join().unwrap();
    session.succeed();
    h.dispatcher.flush().await;

    assert_eq!(
        callback.outcomes(),
        vec![Notification::Cancelled { user_initiated: false }]
    );
    assert!(!h.authenticator.is_authenticating());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_key_makes_unlock_unavailable() {
    let h = Harness::new(PromptBehavior::Accept);
    let registered = h
        .run(AuthenticationRequest::register(b"secret".to_vec()))
        .await
        .single_success();

    h.authenticator.remove_biometry_key();
    assert!(!h.authenticator.has_biometry_key());

    let callback = h
        .run(AuthenticationRequest::unlock(registered.data_to_save().to_vec()))
        .await;
    assert!(matches!(
        callback.outcomes().as_slice(),
        [Notification::Failed(err)] if err.code == ErrorCode::BiometryNotAvailable
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_asymmetric_key_registers_without_prompt() {
    let config = Config::from_toml_str(
        r#"
        [keystore]
        use_symmetric_key = false
        invalidate_on_enrollment_change = false
        "#,
    )
    .unwrap();
    let h = Harness::new(PromptBehavior::Accept);

    let registered = h
        .run(AuthenticationRequest::register(b"api-token".to_vec()).with_config(&config.keystore))
        .await
        .single_success();
    assert_eq!(h.prompt.shown(), 0);

    // Not bound to enrollment, so it survives a change.
    assert_eq!(h.provider.simulate_enrollment_change(), 0);

    let unlocked = h
        .run(AuthenticationRequest::unlock(registered.data_to_save().to_vec()))
        .await
        .single_success();
    assert_eq!(unlocked.derived_data(), b"api-token");
    assert_eq!(h.prompt.shown(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_prompt_frees_authenticator() {
    let h = Harness::new(PromptBehavior::Park);
    let stale = RecordingCallback::new();
    let handle = h
        .authenticator
        .authenticate(AuthenticationRequest::register(b"secret".to_vec()), stale.clone())
        .unwrap();
    let weak = Arc::downgrade(&stale);
    drop(stale);

    drop(h.prompt.take());
    assert!(!h.authenticator.is_authenticating());
    assert!(weak.upgrade().is_none());

    // Cancelling the abandoned attempt is harmless.
    handle.cancel();

    h.prompt.set_behavior(PromptBehavior::Accept);
    let registered = h
        .run(AuthenticationRequest::register(b"secret".to_vec()))
        .await
        .single_success();
    assert!(registered.is_new_key());
}
