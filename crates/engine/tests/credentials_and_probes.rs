mod support;

use chrono::Utc;
use provisio_engine::host::ManualAccess;
use provisio_engine::{
    AuthorizationError, ExecutionOutcome, ExistenceCheck, IntegrationRunner, RetryJob, RevokeError, retry_run,
};
use provisio_types::{NotificationKind, RequestFailure};
use serde_json::{Value, json};

use support::*;

fn oauth_integration(expiring: &str, enabled: bool) -> provisio_types::IntegrationConfig {
    integration(
        5,
        json!({
            "expiring": expiring,
            "enabled_oauth": enabled,
            "extra_args": {"oauth": {"access_token": "old-token", "expires_in": 3600}},
            "manifest": {
                "oauth": {
                    "authenticate_url": "https://auth.example/authorize?redirect_uri={{ redirect_url }}",
                    "access_token": {"url": "https://auth.example/token", "method": "POST"},
                    "refresh": {"url": "https://auth.example/refresh", "method": "POST"}
                },
                "execute": [{
                    "url": "https://api.example/me",
                    "headers": {"Authorization": "Bearer {{ oauth.access_token }}"}
                }]
            }
        }),
    )
}

#[test]
fn expired_token_is_refreshed_and_persisted_before_steps_run() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![
        ok(json!({"access_token": "new-token", "expires_in": 3600})),
        ok(json!({"me": true})),
    ]);
    let mut runner = IntegrationRunner::new(
        oauth_integration("2000-01-01T00:00:00Z", true),
        &settings,
        &transport,
        collaborators.host(),
    );

    let report = runner.execute(None, params(json!({})));
    assert!(report.outcome.is_success(), "{:?}", report.outcome);

    let requests = transport.requests();
    assert_eq!(requests[0].url, "https://auth.example/refresh");
    assert_eq!(
        requests[1].headers,
        vec![("Authorization".to_string(), "Bearer new-token".to_string())]
    );

    let writes = collaborators.store.credential_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1.extra_args["oauth"]["access_token"], "new-token");
    assert!(runner.integration().expiring > Utc::now());
}

#[test]
fn valid_token_is_not_refreshed() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![ok(json!({"me": true}))]);
    let mut runner = IntegrationRunner::new(
        oauth_integration("2999-01-01T00:00:00Z", true),
        &settings,
        &transport,
        collaborators.host(),
    );

    let report = runner.execute(None, params(json!({})));
    assert!(report.outcome.is_success());
    assert_eq!(transport.calls(), 1);
    assert!(collaborators.store.credential_writes().is_empty());
}

#[test]
fn failed_refresh_stops_the_run_without_retrying() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![status(500, "upstream down")]);
    let mut runner = IntegrationRunner::new(
        oauth_integration("2000-01-01T00:00:00Z", true),
        &settings,
        &transport,
        collaborators.host(),
    );
    let mut actor = actor(9, json!({}));

    let report = runner.execute(Some(&mut actor), params(json!({})));
    assert_eq!(report.outcome, ExecutionOutcome::RenewalFailed);
    assert_eq!(transport.calls(), 1);
    let records = collaborators.notifications.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, NotificationKind::FailedIntegration);
    assert_eq!(records[0].description, "Refresh url: upstream down");
    assert!(collaborators.scheduler.jobs().is_empty());
    assert!(collaborators.store.credential_writes().is_empty());
}

#[test]
fn authorize_url_points_back_at_the_callback() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(Vec::new());
    let runner = IntegrationRunner::new(
        oauth_integration("2000-01-01T00:00:00Z", false),
        &settings,
        &transport,
        collaborators.host(),
    );

    assert_eq!(
        runner.authorize_url().as_deref(),
        Some("https://auth.example/authorize?redirect_uri=http://localhost:8000/integrations/oauth/5/callback/")
    );
}

#[test]
fn authorization_exchanges_the_code_once() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![ok(json!({"access_token": "first", "expires_in": 60}))]);
    let mut runner = IntegrationRunner::new(
        oauth_integration("2000-01-01T00:00:00Z", false),
        &settings,
        &transport,
        collaborators.host(),
    );

    assert_eq!(runner.complete_authorization(None), Err(AuthorizationError::MissingCode));
    assert_eq!(runner.complete_authorization(Some("")), Err(AuthorizationError::MissingCode));
    assert_eq!(transport.calls(), 0);

    runner.complete_authorization(Some("abc")).expect("authorized");
    assert_eq!(transport.requests()[0].url, "https://auth.example/token?code=abc");
    assert!(runner.integration().enabled_oauth);
    assert_eq!(
        runner.integration().extra_args["oauth"],
        json!({"access_token": "first", "expires_in": 60})
    );
    assert_eq!(collaborators.store.credential_writes().len(), 1);

    assert_eq!(
        runner.complete_authorization(Some("again")),
        Err(AuthorizationError::AlreadyAuthorized)
    );
}

#[test]
fn rejected_code_exchange_reports_the_server_reply() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![status(400, "invalid_grant")]);
    let mut runner = IntegrationRunner::new(
        oauth_integration("2000-01-01T00:00:00Z", false),
        &settings,
        &transport,
        collaborators.host(),
    );

    assert_eq!(
        runner.complete_authorization(Some("abc")),
        Err(AuthorizationError::Request("invalid_grant".into()))
    );
    assert!(!runner.integration().enabled_oauth);
    assert!(collaborators.store.credential_writes().is_empty());
}

fn probe(reply: Result<provisio_types::HttpResponse, RequestFailure>, manifest: Value) -> ExistenceCheck {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![reply]);
    let mut runner = IntegrationRunner::new(
        integration(5, json!({"manifest": manifest})),
        &settings,
        &transport,
        collaborators.host(),
    );
    runner.exists(&actor(9, json!({})))
}

#[test]
fn exists_probe_looks_for_the_expected_text() {
    let manifest = json!({
        "exists": {"url": "https://api.example/users?email={{ email }}", "expected": "{{ email }}"},
        "execute": []
    });
    assert_eq!(
        probe(ok(json!({"users": [{"email": "ada@example.com"}]})), manifest.clone()),
        ExistenceCheck::Present
    );
    assert_eq!(probe(ok(json!({"users": []})), manifest.clone()), ExistenceCheck::Absent);
    assert_eq!(probe(Err(RequestFailure::Timeout), manifest), ExistenceCheck::Unknown);
    assert_eq!(
        probe(ok(json!({})), json!({"execute": []})),
        ExistenceCheck::Unknown
    );
}

#[test]
fn manual_integrations_answer_from_access_records() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(Vec::new());
    let manual = integration(
        5,
        json!({"manifest_type": "manual_user_provisioning", "manifest": {"extra_user_info": [{"id": "shirt", "name": "Shirt"}]}}),
    );
    let mut runner = IntegrationRunner::new(manual, &settings, &transport, collaborators.host());
    let actor = actor(9, json!({}));

    assert_eq!(runner.exists(&actor), ExistenceCheck::Absent);
    collaborators
        .store
        .grant_manual_access(9, 5, ManualAccess { revoked: false });
    assert_eq!(runner.exists(&actor), ExistenceCheck::Present);
    collaborators
        .store
        .grant_manual_access(9, 5, ManualAccess { revoked: true });
    assert_eq!(runner.exists(&actor), ExistenceCheck::Absent);

    assert_eq!(runner.revoke(&actor), Err(RevokeError::ManualIntegration));
    assert!(!runner.needs_user_info(&actor));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn revoke_runs_steps_in_order_with_earlier_responses() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![ok(json!({"id": "u-1"})), status(204, "")]);
    let integration = integration(
        5,
        json!({"manifest": {"revoke": [
            {"url": "https://api.example/users?email={{ email }}"},
            {"url": "https://api.example/users/{{ responses.0.id }}", "method": "DELETE"}
        ]}}),
    );
    let mut runner = IntegrationRunner::new(integration, &settings, &transport, collaborators.host());

    runner.revoke(&actor(9, json!({}))).expect("revoked");
    let requests = transport.requests();
    assert_eq!(requests[0].url, "https://api.example/users?email=ada@example.com");
    assert_eq!(requests[1].url, "https://api.example/users/u-1");
}

#[test]
fn revoke_stops_at_the_first_failure_with_a_scrubbed_reason() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![status(500, "token hunter22 invalid"), ok(json!({}))]);
    let integration = integration(
        5,
        json!({
            "extra_args": {"API_KEY": "hunter22"},
            "manifest": {"revoke": [{"url": "https://api.example/a"}, {"url": "https://api.example/b"}]}
        }),
    );
    let mut runner = IntegrationRunner::new(integration, &settings, &transport, collaborators.host());

    assert_eq!(
        runner.revoke(&actor(9, json!({}))),
        Err(RevokeError::Step("token ***Secret value for API_KEY*** invalid".into()))
    );
    assert_eq!(transport.calls(), 1);
}

#[test]
fn revoke_refuses_when_credentials_cannot_be_renewed() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![Err(RequestFailure::Timeout)]);
    let mut runner = IntegrationRunner::new(
        oauth_integration("2000-01-01T00:00:00Z", true),
        &settings,
        &transport,
        collaborators.host(),
    );

    assert_eq!(runner.revoke(&actor(9, json!({}))), Err(RevokeError::Renewal));
}

#[test]
fn missing_extra_user_info_requires_questions() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(Vec::new());
    let integration = integration(
        5,
        json!({"manifest": {"extra_user_info": [{"id": "shirt", "name": "Shirt size"}]}}),
    );
    let runner = IntegrationRunner::new(integration, &settings, &transport, collaborators.host());

    assert!(runner.needs_user_info(&actor(9, json!({}))));
    assert!(!runner.needs_user_info(&actor(9, json!({"shirt": "M"}))));
}

#[test]
fn retry_reloads_records_and_runs_with_the_saved_params() {
    let collaborators = Collaborators::default();
    let settings = settings();
    let transport = ScriptedTransport::new(vec![ok(json!({"ok": true}))]);
    collaborators.store.insert_integration(integration(
        5,
        json!({"manifest": {"execute": [{"url": "https://api.example/teams/{{ team }}/members/{{ remote_id }}"}]}}),
    ));
    collaborators.store.insert_actor(actor(9, json!({"remote_id": "77"})));
    let job = RetryJob {
        actor_id: 9,
        integration_id: 5,
        params: params(json!({"team": "ops"})),
    };

    let report = retry_run(&job, &settings, &transport, collaborators.host()).expect("retry");
    assert!(report.outcome.is_success());
    assert_eq!(transport.requests()[0].url, "https://api.example/teams/ops/members/77");
    assert_eq!(collaborators.notifications.kinds(), vec![NotificationKind::RanIntegration]);

    let missing = RetryJob {
        actor_id: 404,
        integration_id: 5,
        params: params(json!({})),
    };
    let error = retry_run(&missing, &settings, &transport, collaborators.host()).expect_err("missing actor");
    assert!(format!("{error:#}").contains("actor 404"));
}
