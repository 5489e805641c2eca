mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use common::*;
use vocalwise_client::backend::fs_blob::FsBlobStore;
use vocalwise_client::backend::memory::InMemoryBackend;
use vocalwise_client::backend::DocumentStore;
use vocalwise_client::login_guard::LockStatus;
use vocalwise_client::message_sync::Author;
use vocalwise_client::platform::{AlwaysAnswer, NavigationLog, Route};
use vocalwise_client::send::{
    AnalysisOutcome, SendOutcome, SendPipeline, SendRequest, SendSettings, SendState, SkipReason,
};
use vocalwise_client::{App, ChatError, Collaborators};
use vocalwise_shared::clock::SystemClock;
use vocalwise_shared::constants::{
    AUTO_REPLY_TEXT, MAX_ATTACHMENT_SIZE, NEW_CHAT_PLACEHOLDER, SYSTEM_USER_ID,
};
use vocalwise_shared::models::PendingAttachment;
use vocalwise_shared::types::ConversationId;
use vocalwise_shared::ValidationError;
use vocalwise_store::MemoryStore;

#[tokio::test]
async fn first_message_creates_conversation() {
    let (h, user) = signed_in(quiet_config()).await;
    let mut session = started(&h).await;
    assert!(session.conversations().is_empty());
    assert_eq!(session.selected(), None);

    let composer = session.composer();
    let report = send_text(&composer, "Hello", session.selected().cloned())
        .await
        .unwrap();
    assert!(report.created_conversation);

    assert!(session.run_until(WAIT, |s| s.messages().len() == 1).await);
    assert_eq!(session.selected(), Some(&report.conversation));

    let message = &session.messages()[0];
    assert_eq!(message.text, "Hello");
    assert_eq!(message.author, Author::SelfUser);

    let conversation = h.backend.conversation(&report.conversation).unwrap();
    assert_eq!(conversation.owner, user.id);
    assert_eq!(conversation.last_message, "Hello");
    assert!(composer.draft().text.is_empty());
    assert_eq!(*composer.state().borrow(), SendState::Completed);
}

#[tokio::test]
async fn three_failed_logins_lock_the_gate() {
    let h = harness(quiet_config());
    h.backend.add_account(EMAIL, PASSWORD, None);
    let gate = h.app.gate();

    for _ in 0..2 {
        let err = gate.sign_in(EMAIL, "wrong").await.unwrap_err();
        assert!(matches!(err, ChatError::AuthFailed(_)));
        h.clock.advance(chrono::Duration::seconds(20));
    }
    let err = gate.sign_in(EMAIL, "wrong").await.unwrap_err();
    assert!(matches!(err, ChatError::RateLimited { .. }));
    assert_eq!(h.nav.last(), Some(Route::Recovery));

    // Correct password, still refused locally.
    match gate.sign_in(EMAIL, PASSWORD).await.unwrap_err() {
        ChatError::RateLimited { remaining } => assert_eq!(remaining, Duration::from_secs(300)),
        other => panic!("expected lockout, got {other:?}"),
    }
    assert_eq!(h.nav.last(), Some(Route::Recovery));

    h.clock.advance(chrono::Duration::seconds(299));
    assert!(gate.guard().check_status().unwrap().is_locked());
    h.clock.advance(chrono::Duration::seconds(1));
    assert_eq!(gate.guard().check_status().unwrap(), LockStatus::Unlocked);

    gate.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(h.nav.last(), Some(Route::Chat));
    assert_eq!(gate.guard().attempts(), 0);
}

#[tokio::test]
async fn remote_delete_of_viewed_conversation_falls_back() {
    let (h, user) = signed_in(quiet_config()).await;
    let older = seed_conversation(&h.backend, &user, "older").await;
    let newer = seed_conversation(&h.backend, &user, "newer").await;

    let mut session = started(&h).await;
    assert!(
        session
            .run_until(WAIT, |s| s.selected() == Some(&newer) && s.messages().len() == 1)
            .await
    );

    h.backend.delete_conversation(&newer).await.unwrap();
    assert!(
        session
            .run_until(WAIT, |s| {
                s.selected() == Some(&older)
                    && s.messages().len() == 1
                    && s.messages()[0].text == "older"
            })
            .await
    );

    h.backend.delete_conversation(&older).await.unwrap();
    assert!(
        session
            .run_until(WAIT, |s| s.selected().is_none() && s.messages().is_empty())
            .await
    );
    assert!(!session.has_message_listener());
}

#[tokio::test]
async fn failed_upload_keeps_draft_and_writes_nothing() {
    let (h, user) = signed_in(quiet_config()).await;
    let session = started(&h).await;
    let composer = session.composer();

    h.backend.fail_next_uploads(1);
    composer.attach(PendingAttachment::new("talk.pdf", Bytes::from_static(b"%PDF")));
    let err = composer.send(None).await.unwrap_err();

    assert!(matches!(err, ChatError::UploadFailed(_)));
    assert_eq!(h.backend.message_count(), 0);
    assert!(h.backend.conversations_of(&user.id).is_empty());
    let draft = composer.draft();
    assert_eq!(draft.attachment.map(|a| a.file_name), Some("talk.pdf".to_string()));
    assert_eq!(*composer.state().borrow(), SendState::Failed);

    // Retrying the same draft succeeds.
    let outcome = composer.send(None).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Sent(_)));
    assert_eq!(h.backend.message_count(), 1);
    assert!(composer.draft().attachment.is_none());
}

#[tokio::test]
async fn attachment_only_message_uses_file_name_as_preview() {
    let (h, _user) = signed_in(quiet_config()).await;
    let session = started(&h).await;
    let composer = session.composer();

    composer.attach(PendingAttachment::new("Pitch deck.pptx", Bytes::from_static(b"ppt")));
    let SendOutcome::Sent(report) = composer.send(None).await.unwrap() else {
        panic!("skipped");
    };

    let url = report.attachment_url.clone().unwrap();
    assert!(url.starts_with("memory://uploads/"));
    assert!(url.ends_with("_Pitch_deck.pptx"));

    let conversation = h.backend.conversation(&report.conversation).unwrap();
    assert_eq!(conversation.last_message, "Pitch deck.pptx");
    let stored = &h.backend.messages(&report.conversation)[0];
    assert_eq!(stored.text, "");
    assert_eq!(stored.attachment_name.as_deref(), Some("Pitch deck.pptx"));
    assert_eq!(stored.attachment_url.as_deref(), Some(url.as_str()));
    assert_eq!(report.analysis, AnalysisOutcome::NotRequested);
}

#[tokio::test]
async fn empty_draft_is_skipped() {
    let (h, _user) = signed_in(quiet_config()).await;
    let session = started(&h).await;
    let composer = session.composer();

    composer.set_text("   \n ");
    let outcome = composer.send(None).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Skipped(_)));
    assert_eq!(h.backend.message_count(), 0);
    assert_eq!(composer.draft().text, "   \n ");
}

#[tokio::test]
async fn empty_pipeline_send_is_a_no_op() {
    let (h, user) = signed_in(quiet_config()).await;
    let pipeline = SendPipeline::new(
        h.app.gate().clone(),
        Arc::new(h.backend.clone()),
        Arc::new(h.backend.clone()),
        Arc::new(h.clock.clone()),
        SendSettings::from(h.app.config()),
    );
    let state = pipeline.state();

    let outcome = pipeline
        .send(SendRequest {
            text: " \t ".into(),
            attachment: None,
            conversation: None,
        })
        .await
        .unwrap();

    assert!(matches!(outcome, SendOutcome::Skipped(SkipReason::Empty)));
    assert_eq!(*state.borrow(), SendState::Idle);
    assert_eq!(h.backend.message_count(), 0);
    assert!(h.backend.conversations_of(&user.id).is_empty());
}

#[tokio::test]
async fn attachment_lands_in_blob_directory() {
    let dir = tempfile::tempdir().unwrap();
    let backend = InMemoryBackend::new();
    backend.add_account(EMAIL, PASSWORD, None);
    let blobs = FsBlobStore::new(dir.path().to_path_buf(), MAX_ATTACHMENT_SIZE)
        .await
        .unwrap();
    let app = App::new(
        quiet_config(),
        Collaborators {
            auth: Arc::new(backend.clone()),
            documents: Arc::new(backend.clone()),
            blobs: Arc::new(blobs),
            kv: Arc::new(MemoryStore::new()),
            navigator: Arc::new(NavigationLog::new()),
            clock: Arc::new(SystemClock),
        },
    )
    .unwrap();
    app.gate().sign_in(EMAIL, PASSWORD).await.unwrap();
    let mut session = app.session();
    session.start().await.unwrap();
    let composer = session.composer();

    composer.attach(PendingAttachment::new("notes.txt", Bytes::from_static(b"hi")));
    let report = send_text(&composer, "", None).await.unwrap();

    let url = report.attachment_url.unwrap();
    assert!(url.starts_with("file://"));
    let stored: Vec<_> = std::fs::read_dir(dir.path().join("uploads"))
        .unwrap()
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        backend.messages(&report.conversation)[0].attachment_url.as_deref(),
        Some(url.as_str())
    );
}

#[tokio::test]
async fn auto_reply_follows_user_message() {
    let config = vocalwise_client::ClientConfig {
        auto_reply_enabled: true,
        auto_reply_delay: Duration::from_millis(10),
        ..quiet_config()
    };
    let (h, _user) = signed_in(config).await;
    let mut session = started(&h).await;
    let composer = session.composer();

    let report = send_text(&composer, "How do I sound?", None).await.unwrap();
    report.follow_up.unwrap().await.unwrap();

    assert!(session.run_until(WAIT, |s| s.messages().len() == 2).await);
    let reply = &session.messages()[1];
    assert_eq!(reply.author, Author::System);
    assert_eq!(reply.text, AUTO_REPLY_TEXT);
    assert!(reply.animate);

    session.mark_animated(&reply.id).unwrap();
    let conversation = h.backend.conversation(&report.conversation).unwrap();
    assert_eq!(conversation.last_message, AUTO_REPLY_TEXT);
}

#[tokio::test]
async fn media_attachment_gets_analysis_reply() {
    let h = harness(quiet_config());
    h.backend.add_account(EMAIL, PASSWORD, None);
    let backend = h.backend.clone();
    let app = h
        .app
        .with_analysis(Arc::new(StubAnalysis(Ok("Steady pace, clear voice".into()))));
    app.gate().sign_in(EMAIL, PASSWORD).await.unwrap();

    let mut session = app.session();
    session.start().await.unwrap();
    let composer = session.composer();
    composer.set_text("rate my talk");
    composer.attach(PendingAttachment::new("talk.mp4", Bytes::from_static(b"frames")));

    let SendOutcome::Sent(report) = composer.send(None).await.unwrap() else {
        panic!("skipped");
    };
    assert!(matches!(report.analysis, AnalysisOutcome::Completed(_)));
    assert!(report.follow_up.is_none());

    assert!(session.run_until(WAIT, |s| s.messages().len() == 2).await);
    assert_eq!(session.messages()[0].author, Author::SelfUser);
    assert_eq!(session.messages()[1].text, "Steady pace, clear voice");
    assert_eq!(
        backend.messages(&report.conversation)[1].author_user_id.as_str(),
        SYSTEM_USER_ID
    );
}

#[tokio::test]
async fn failed_analysis_keeps_user_message() {
    let h = harness(quiet_config());
    h.backend.add_account(EMAIL, PASSWORD, None);
    let backend = h.backend.clone();
    let app = h
        .app
        .with_analysis(Arc::new(StubAnalysis(Err("endpoint answered 502".into()))));
    app.gate().sign_in(EMAIL, PASSWORD).await.unwrap();

    let session = app.session();
    let composer = session.composer();
    composer.attach(PendingAttachment::new("talk.mov", Bytes::from_static(b"frames")));

    let SendOutcome::Sent(report) = composer.send(None).await.unwrap() else {
        panic!("skipped");
    };
    assert!(matches!(report.analysis_error(), Some(ChatError::AnalysisFailed(_))));
    assert_eq!(backend.messages(&report.conversation).len(), 1);
    assert!(composer.draft().attachment.is_none());
}

#[tokio::test]
async fn lagging_read_after_create_is_tolerated() {
    let config = vocalwise_client::ClientConfig {
        settle_retries: 2,
        ..quiet_config()
    };
    let (h, _user) = signed_in(config).await;
    let session = started(&h).await;
    let composer = session.composer();

    h.backend.lag_next_reads(1);
    let report = send_text(&composer, "first", None).await.unwrap();
    assert_eq!(h.backend.messages(&report.conversation).len(), 1);

    // Never readable: the conversation is written again before the message.
    h.backend.lag_next_reads(3);
    let report = send_text(&composer, "second", None).await.unwrap();
    let conversation = h.backend.conversation(&report.conversation).unwrap();
    assert_eq!(conversation.last_message, "second");
}

#[tokio::test]
async fn sending_into_vanished_conversation_is_not_found() {
    let (h, _user) = signed_in(quiet_config()).await;
    let session = started(&h).await;
    let composer = session.composer();

    let err = send_text(&composer, "hi", Some(ConversationId::from("gone")))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
    assert_eq!(h.backend.message_count(), 0);
    assert_eq!(composer.draft().text, "hi");
}

#[tokio::test]
async fn denied_commit_is_retried_once_after_refresh() {
    let (h, _user) = signed_in(quiet_config()).await;
    let session = started(&h).await;
    let composer = session.composer();
    let refreshes = h.backend.token_refreshes();

    h.backend.deny_next_commits(1);
    send_text(&composer, "one", None).await.unwrap();
    assert_eq!(h.backend.token_refreshes(), refreshes + 1);
    assert_eq!(h.backend.message_count(), 1);

    h.backend.deny_next_commits(2);
    let err = send_text(&composer, "two", None).await.unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied));
    assert_eq!(h.backend.message_count(), 1);
}

#[tokio::test]
async fn denied_listener_refreshes_and_resubscribes() {
    let (h, user) = signed_in(quiet_config()).await;
    seed_conversation(&h.backend, &user, "hello").await;
    let refreshes = h.backend.token_refreshes();

    h.backend.deny_next_subscriptions(1);
    let mut session = h.app.session();
    session.start().await.unwrap();

    assert!(session.run_until(WAIT, |s| s.conversations().len() == 1).await);
    assert_eq!(h.backend.token_refreshes(), refreshes + 1);
}

#[tokio::test]
async fn listener_denied_twice_gives_up_with_empty_list() {
    let (h, user) = signed_in(quiet_config()).await;
    seed_conversation(&h.backend, &user, "hello").await;

    h.backend.deny_next_subscriptions(2);
    let mut session = h.app.session();
    session.start().await.unwrap();

    // Denied, refreshed, denied again.
    session.next_update().await.unwrap();
    session.next_update().await.unwrap();
    assert!(session.conversations().is_empty());
    assert_eq!(session.selected(), None);
    assert_eq!(h.backend.active_conversation_listeners(), 0);
}

#[tokio::test]
async fn later_list_denial_gets_its_own_refresh() {
    let (h, user) = signed_in(quiet_config()).await;
    seed_conversation(&h.backend, &user, "hello").await;
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.conversations().len() == 1).await);
    let refreshes = h.backend.token_refreshes();

    h.backend.revoke_conversation_listeners();
    assert!(
        session
            .run_until(WAIT, |_| h.backend.token_refreshes() == refreshes + 1)
            .await
    );

    // A second stale token later in the same session.
    h.backend.revoke_conversation_listeners();
    assert!(
        session
            .run_until(WAIT, |_| h.backend.token_refreshes() == refreshes + 2)
            .await
    );
    session.drain().await;
    assert_eq!(session.conversations().len(), 1);
    assert_eq!(h.backend.active_conversation_listeners(), 1);
}

#[tokio::test]
async fn denied_message_listener_refreshes_and_resubscribes() {
    let (h, user) = signed_in(quiet_config()).await;
    let id = seed_conversation(&h.backend, &user, "hello").await;
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.messages().len() == 1).await);
    let refreshes = h.backend.token_refreshes();

    h.backend.revoke_message_listeners();
    assert!(
        session
            .run_until(WAIT, |_| h.backend.token_refreshes() == refreshes + 1)
            .await
    );
    assert!(session.run_until(WAIT, |s| s.messages().len() == 1).await);
    assert_eq!(h.backend.active_message_listeners(), 1);

    h.backend.revoke_message_listeners();
    assert!(
        session
            .run_until(WAIT, |_| h.backend.token_refreshes() == refreshes + 2)
            .await
    );
    assert!(session.has_message_listener());
    assert_eq!(session.selected(), Some(&id));
    assert_eq!(h.backend.active_message_listeners(), 1);
}

#[tokio::test]
async fn message_listener_denied_twice_clears_messages() {
    let (h, user) = signed_in(quiet_config()).await;
    let id = seed_conversation(&h.backend, &user, "hello").await;
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.messages().len() == 1).await);

    // Denied, refreshed, denied again on the new listener.
    h.backend.deny_next_subscriptions(1);
    h.backend.revoke_message_listeners();
    assert!(
        session
            .run_until(WAIT, |s| s.messages().is_empty() && !s.has_message_listener())
            .await
    );

    assert_eq!(session.selected(), Some(&id));
    assert_eq!(session.conversations().len(), 1);
    assert_eq!(h.backend.active_message_listeners(), 0);
}

#[tokio::test]
async fn switching_conversations_keeps_one_message_listener() {
    let (h, user) = signed_in(quiet_config()).await;
    let mut seeded = Vec::new();
    for text in ["first", "second", "third"] {
        seeded.push((seed_conversation(&h.backend, &user, text).await, text));
    }
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.conversations().len() == 3).await);

    for i in [0, 1, 2, 0, 1, 1] {
        let (id, text) = &seeded[i];
        session.select(id).await.unwrap();
        assert!(
            session
                .run_until(WAIT, |s| {
                    s.messages().len() == 1 && s.messages()[0].text == *text
                })
                .await
        );
        assert_eq!(h.backend.active_message_listeners(), 1);
        assert_eq!(session.selected(), Some(id));
    }
}

#[tokio::test]
async fn event_loop_with_competing_input_keeps_listener() {
    let (h, user) = signed_in(quiet_config()).await;
    let ids = [
        seed_conversation(&h.backend, &user, "first").await,
        seed_conversation(&h.backend, &user, "second").await,
    ];
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.conversations().len() == 2).await);

    let mut switches = 0;
    let deadline = tokio::time::Instant::now() + WAIT;
    while switches < 6 && tokio::time::Instant::now() < deadline {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                session.apply(event).await;
            }
            _ = tokio::time::sleep(Duration::from_millis(1)) => {
                session.select(&ids[switches % 2]).await.unwrap();
                switches += 1;
            }
        }
    }

    assert_eq!(switches, 6);
    assert!(
        session
            .run_until(WAIT, |s| s.messages().len() == 1 && s.messages()[0].text == "second")
            .await
    );
    assert_eq!(session.selected(), Some(&ids[1]));
    assert_eq!(h.backend.active_message_listeners(), 1);
}

#[tokio::test]
async fn new_conversation_reuses_empty_one() {
    let (h, _user) = signed_in(quiet_config()).await;
    let mut session = started(&h).await;

    let id = session.new_conversation().await.unwrap();
    assert!(session.run_until(WAIT, |s| s.selected() == Some(&id)).await);
    assert_eq!(
        h.backend.conversation(&id).unwrap().last_message,
        NEW_CHAT_PLACEHOLDER
    );

    let err = session.new_conversation().await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::ValidationFailed(ValidationError::EmptyConversationExists)
    ));
    assert_eq!(session.selected(), Some(&id));
    assert_eq!(session.conversations().len(), 1);
}

#[tokio::test]
async fn delete_requires_confirmation() {
    let (h, user) = signed_in(quiet_config()).await;
    let older = seed_conversation(&h.backend, &user, "older").await;
    let newer = seed_conversation(&h.backend, &user, "newer").await;
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.selected() == Some(&newer)).await);

    assert!(!session
        .delete_conversation(&newer, &AlwaysAnswer(false))
        .await
        .unwrap());
    assert!(h.backend.conversation(&newer).is_some());

    assert!(session
        .delete_conversation(&newer, &AlwaysAnswer(true))
        .await
        .unwrap());
    assert!(h.backend.conversation(&newer).is_none());
    assert!(h.backend.messages(&newer).is_empty());
    assert_eq!(session.selected(), Some(&older));
    assert!(
        session
            .run_until(WAIT, |s| s.messages().len() == 1 && s.messages()[0].text == "older")
            .await
    );
}

#[tokio::test]
async fn selecting_unknown_conversation_fails() {
    let (h, _user) = signed_in(quiet_config()).await;
    let mut session = started(&h).await;
    let err = session.select(&ConversationId::from("nope")).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn session_requires_verified_user() {
    let h = harness(quiet_config());
    let mut session = h.app.session();
    assert!(matches!(
        session.start().await,
        Err(ChatError::Unauthenticated)
    ));
}

#[tokio::test]
async fn sign_out_releases_listeners() {
    let (h, user) = signed_in(quiet_config()).await;
    seed_conversation(&h.backend, &user, "hello").await;
    let mut session = started(&h).await;
    assert!(session.run_until(WAIT, |s| s.messages().len() == 1).await);
    assert_eq!(h.backend.active_message_listeners(), 1);

    session.sign_out().await.unwrap();
    assert_eq!(h.backend.active_message_listeners(), 0);
    assert_eq!(h.backend.active_conversation_listeners(), 0);
    assert_eq!(h.nav.last(), Some(Route::Login));
    assert!(session.conversations().is_empty());
}
