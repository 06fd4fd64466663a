//! tests/dispatch_tests.rs
//! Channel routing, sender resolution and provider payloads. No network.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::Utc;

    use crate::models::dispatch_model::{DeliveryOutcome, DispatchError, SendRequest, SenderIdentity};
    use crate::models::message_model::Platform;
    use crate::services::channel_dispatcher::ChannelDispatcher;
    use crate::services::delivery_executor::DeliveryExecutor;
    use crate::services::email_service::build_raw_message;
    use crate::services::telegram_service::reminder_text;
    use crate::tests::support::{due_message, StubProvider, StubUsers};

    fn request(platform: Platform, recipient: Option<&str>) -> SendRequest {
        SendRequest {
            platform,
            recipient: recipient.map(str::to_string),
            subject: Some("Subject".to_string()),
            content: "Body".to_string(),
            sender: None,
        }
    }

    fn linked_sender() -> SenderIdentity {
        SenderIdentity {
            user_id: Some("u1".to_string()),
            email: Some("ana@example.com".to_string()),
            delegation_credential: Some("refresh-token".to_string()),
        }
    }

    #[actix_rt::test]
    async fn test_email_requires_sender() {
        let gmail = StubProvider::ok("gmail");
        let dispatcher = ChannelDispatcher::new().with_email(gmail.clone());

        let err = dispatcher
            .dispatch(&request(Platform::Email, Some("bob@example.com")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Identity("No sender specified for email delivery".to_string())
        );
        assert!(err.to_string().starts_with("Sender identity error:"));
        assert!(gmail.calls().is_empty());
    }

    #[actix_rt::test]
    async fn test_email_requires_delegated_credential() {
        let dispatcher = ChannelDispatcher::new().with_email(StubProvider::ok("gmail"));
        let mut req = request(Platform::Email, Some("bob@example.com"));
        req.sender = Some(SenderIdentity {
            delegation_credential: None,
            ..linked_sender()
        });

        let err = dispatcher.dispatch(&req).await.unwrap_err();
        assert!(matches!(err, DispatchError::Identity(_)));
        assert!(err.to_string().contains("missing refresh token"));
    }

    #[actix_rt::test]
    async fn test_email_sends_as_sender() {
        let gmail = StubProvider::ok("gmail");
        let dispatcher = ChannelDispatcher::new().with_email(gmail.clone());
        let mut req = request(Platform::Email, Some("bob@example.com"));
        req.sender = Some(linked_sender());

        let id = dispatcher.dispatch(&req).await.unwrap();
        assert_eq!(id, "gmail-1");

        let calls = gmail.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].destination, "bob@example.com");
        assert_eq!(calls[0].sender_email.as_deref(), Some("ana@example.com"));
        assert_eq!(calls[0].subject.as_deref(), Some("Subject"));
    }

    #[actix_rt::test]
    async fn test_unconfigured_channels_are_configuration_errors() {
        let dispatcher = ChannelDispatcher::new();

        let mut email = request(Platform::Email, Some("bob@example.com"));
        email.sender = Some(linked_sender());
        let cases = [
            (email, "GOOGLE_CLIENT_ID"),
            (request(Platform::Sms, Some("+14155552671")), "TWILIO_SMS_PHONE"),
            (request(Platform::WhatsApp, Some("+14155552671")), "TWILIO_WHATSAPP_PHONE"),
            (request(Platform::Telegram, None), "TELEGRAM_BOT_TOKEN"),
        ];

        for (req, variable) in cases {
            let err = dispatcher.dispatch(&req).await.unwrap_err();
            assert!(
                matches!(err, DispatchError::Configuration(_)),
                "{}: {:?}",
                req.platform,
                err
            );
            assert!(err.to_string().contains(variable), "{}", err);
        }
    }

    #[actix_rt::test]
    async fn test_recipient_is_validated_before_routing() {
        // no provider at all, yet the bad number is what gets reported
        let err = ChannelDispatcher::new()
            .dispatch(&request(Platform::Sms, Some("not-a-number")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Validation("Invalid phone number format (E.164 required)".to_string())
        );
    }

    #[actix_rt::test]
    async fn test_whatsapp_gets_prefixed_destination() {
        let sms = StubProvider::ok("twilio-sms");
        let whatsapp = StubProvider::ok("twilio-whatsapp");
        let dispatcher = ChannelDispatcher::new()
            .with_sms(sms.clone())
            .with_whatsapp(whatsapp.clone());

        dispatcher
            .dispatch(&request(Platform::WhatsApp, Some("+14155552671")))
            .await
            .unwrap();

        assert!(sms.calls().is_empty());
        assert_eq!(whatsapp.calls()[0].destination, "whatsapp:+14155552671");
    }

    #[actix_rt::test]
    async fn test_reminder_goes_to_fixed_chat() {
        let telegram = StubProvider::ok("telegram");
        let dispatcher = ChannelDispatcher::new().with_reminder("4242", telegram.clone());

        dispatcher
            .dispatch(&request(Platform::Telegram, Some("+14155552671")))
            .await
            .unwrap();

        assert_eq!(telegram.calls()[0].destination, "4242");
    }

    #[actix_rt::test]
    async fn test_provider_error_is_returned() {
        let sms = StubProvider::failing_for("twilio-sms", &["+14155552671"]);
        let dispatcher = ChannelDispatcher::new().with_sms(sms);

        let err = dispatcher
            .dispatch(&request(Platform::Sms, Some("+14155552671")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Provider error: twilio-sms rejected +14155552671");
    }

    #[actix_rt::test]
    async fn test_executor_turns_errors_into_failed_outcome() {
        let users = Arc::new(StubUsers::default());
        let executor = DeliveryExecutor::new(
            users,
            ChannelDispatcher::new().with_email(StubProvider::ok("gmail")),
        );
        let message = due_message("ghost", Platform::Email, Some("bob@example.com"), Utc::now());

        let outcome = executor.execute(&message).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                error: "Sender identity error: Sender user not found".to_string()
            }
        );
    }

    #[actix_rt::test]
    async fn test_executor_email_uses_owner_credential() {
        let users = Arc::new(StubUsers::default().with_user(
            "u1",
            "ana@example.com",
            Some("refresh-token"),
        ));
        let gmail = StubProvider::ok("gmail");
        let executor = DeliveryExecutor::new(
            users.clone(),
            ChannelDispatcher::new().with_email(gmail.clone()),
        );
        let mut message = due_message("u1", Platform::Email, Some("bob@example.com"), Utc::now());
        message.sender_email = Some("stale@example.com".to_string());

        let outcome = executor.execute(&message).await;
        assert!(matches!(outcome, DeliveryOutcome::Sent { .. }));
        assert_eq!(users.lookups(), 1);
        assert_eq!(gmail.calls()[0].sender_email.as_deref(), Some("ana@example.com"));
    }

    #[actix_rt::test]
    async fn test_executor_prefers_cached_sender_for_sms() {
        let users = Arc::new(StubUsers::unavailable());
        let sms = StubProvider::ok("twilio-sms");
        let executor = DeliveryExecutor::new(users.clone(), ChannelDispatcher::new().with_sms(sms.clone()));
        let mut message = due_message("u1", Platform::Sms, Some("+14155552671"), Utc::now());
        message.sender_email = Some("ana@example.com".to_string());

        let outcome = executor.execute(&message).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Sent {
                provider_message_id: "twilio-sms-1".to_string()
            }
        );
        assert_eq!(users.lookups(), 0);
        assert_eq!(sms.calls()[0].sender_email.as_deref(), Some("ana@example.com"));
    }

    #[actix_rt::test]
    async fn test_executor_sms_survives_directory_outage() {
        let users = Arc::new(StubUsers::unavailable());
        let sms = StubProvider::ok("twilio-sms");
        let executor = DeliveryExecutor::new(users.clone(), ChannelDispatcher::new().with_sms(sms.clone()));
        let message = due_message("u1", Platform::Sms, Some("+14155552671"), Utc::now());

        assert!(matches!(
            executor.execute(&message).await,
            DeliveryOutcome::Sent { .. }
        ));
        assert_eq!(users.lookups(), 1);
        assert_eq!(sms.calls()[0].sender_email, None);
    }

    #[actix_rt::test]
    async fn test_executor_email_fails_on_directory_outage() {
        let executor = DeliveryExecutor::new(
            Arc::new(StubUsers::unavailable()),
            ChannelDispatcher::new().with_email(StubProvider::ok("gmail")),
        );
        let message = due_message("u1", Platform::Email, Some("bob@example.com"), Utc::now());

        match executor.execute(&message).await {
            DeliveryOutcome::Failed { error } => {
                assert!(error.starts_with("Sender identity error: Sender lookup failed"), "{}", error)
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_email_is_base64url_mime() {
        let raw = build_raw_message(
            "ana@example.com",
            "bob@example.com",
            Some("Lunch?"),
            "See you at noon",
        )
        .unwrap();

        assert!(!raw.contains('='));
        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));

        let mime = String::from_utf8(URL_SAFE_NO_PAD.decode(&raw).unwrap()).unwrap();
        assert!(mime.contains("From: ana@example.com"), "{}", mime);
        assert!(mime.contains("To: bob@example.com"), "{}", mime);
        assert!(mime.contains("Subject: Lunch?"), "{}", mime);
        assert!(mime.contains("See you at noon"), "{}", mime);
    }

    #[test]
    fn test_raw_email_default_subject_and_bad_sender() {
        let raw = build_raw_message("ana@example.com", "bob@example.com", Some("  "), "hi").unwrap();
        let mime = String::from_utf8(URL_SAFE_NO_PAD.decode(&raw).unwrap()).unwrap();
        assert!(mime.contains("Subject: Message from EchoDrop"), "{}", mime);

        let err = build_raw_message("not an address", "bob@example.com", None, "hi").unwrap_err();
        assert!(matches!(err, DispatchError::Identity(_)));
    }

    #[test]
    fn test_reminder_text_fallbacks() {
        assert_eq!(reminder_text(Some("Subject"), "Call mom"), "Call mom");
        assert_eq!(reminder_text(Some("Subject"), "  "), "Subject");
        assert_eq!(reminder_text(None, ""), "Message from EchoDrop (Telegram)");
        assert_eq!(reminder_text(Some(""), ""), "Message from EchoDrop (Telegram)");
    }
}
