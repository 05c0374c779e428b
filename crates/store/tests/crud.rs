mod common;

use chrono::{Duration, Utc};
use codejudge_store::{
    models::{
        Difficulty, NewChatHistory, NewPlaylist, NewProblemInPlaylist, NewProblemSolved,
        NewTestCaseResult, NewTokenBlacklist, PlaylistKey, PlaylistUpdate, ProblemSolvedKey,
        ProblemUpdate, TestCaseResult, TestCaseResultUpdate, UserKey, UserRole, UserUpdate,
    },
    Error, ErrorKind, Filter, FindArgs, Include, IntUpdate, ListUpdate, OrderBy, Value,
};

#[tokio::test]
async fn create_then_find_unique_round_trips() {
    let db = common::database().await;
    let created = common::user(&db, "a@x.com").await;

    assert_eq!(created.role, UserRole::User);
    assert_eq!(created.created_at, created.updated_at);

    let by_id = db
        .users()
        .find_unique(UserKey::Id(created.id.clone()))
        .await
        .unwrap();
    assert_eq!(by_id.as_ref(), Some(&created));

    let by_email = db
        .users()
        .find_unique(UserKey::Email("a@x.com".into()))
        .await
        .unwrap();
    assert_eq!(by_email, Some(created));
}

#[tokio::test]
async fn caller_supplied_ids_are_kept() {
    let db = common::database().await;
    let mut data = common::new_user("id@x.com");
    data.id = Some("fixed-id".into());
    let user = db.users().create(data).await.unwrap();
    assert_eq!(user.id, "fixed-id");
}

#[tokio::test]
async fn partial_update_leaves_other_fields() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;

    let updated = db
        .users()
        .update(
            UserKey::Id(user.id.clone()),
            UserUpdate {
                image: Some(Some("avatar.png".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.image.as_deref(), Some("avatar.png"));
    assert_eq!(updated.name, user.name);
    assert_eq!(updated.email, user.email);
    assert_eq!(updated.password, user.password);
    assert_eq!(updated.created_at, user.created_at);
    assert!(updated.updated_at >= user.updated_at);

    let cleared = db
        .users()
        .update(
            UserKey::Id(user.id.clone()),
            UserUpdate {
                name: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cleared.name, None);
    assert_eq!(cleared.image.as_deref(), Some("avatar.png"));
}

#[tokio::test]
async fn list_and_numeric_updates() {
    let db = common::database().await;
    let owner = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &owner, "Two Sum", Difficulty::Easy).await;

    let pushed = db
        .problems()
        .update(
            problem.id.clone(),
            ProblemUpdate {
                tags: Some(ListUpdate::Push(vec!["hash-map".into(), "math".into()])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(pushed.tags, ["array", "hash-map", "math"]);

    let replaced = db
        .problems()
        .update(
            problem.id.clone(),
            ProblemUpdate {
                tags: Some(ListUpdate::Set(vec!["graph".into()])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(replaced.tags, ["graph"]);

    let submission = common::submission(&db, &owner, &problem).await;
    let result = db
        .test_case_results()
        .create(NewTestCaseResult {
            submission_id: submission.id.clone(),
            test_case: 3,
            expected: "3".into(),
            status: "Accepted".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let steps = [
        (IntUpdate::Increment(4), 7),
        (IntUpdate::Multiply(3), 21),
        (IntUpdate::Decrement(1), 20),
        (IntUpdate::Divide(6), 3),
        (IntUpdate::Set(0), 0),
    ];
    for (update, expected) in steps {
        let updated: TestCaseResult = db
            .test_case_results()
            .update(
                result.id.clone(),
                TestCaseResultUpdate {
                    test_case: Some(update),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.test_case, expected, "after {update:?}");
    }

    let err = db
        .test_case_results()
        .update(
            result.id.clone(),
            TestCaseResultUpdate {
                test_case: Some(IntUpdate::Divide(0)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn numeric_updates_fail_instead_of_overflowing() {
    let db = common::database().await;
    let owner = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &owner, "Two Sum", Difficulty::Easy).await;
    let submission = common::submission(&db, &owner, &problem).await;
    let result = db
        .test_case_results()
        .create(NewTestCaseResult {
            submission_id: submission.id.clone(),
            test_case: i32::MAX,
            expected: "3".into(),
            status: "Accepted".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    for update in [
        IntUpdate::Increment(1),
        IntUpdate::Multiply(2),
        IntUpdate::Decrement(-1),
    ] {
        let err = db
            .test_case_results()
            .update(
                result.id.clone(),
                TestCaseResultUpdate {
                    test_case: Some(update),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }), "{update:?}: {err:?}");
        assert_eq!(err.kind(), ErrorKind::KnownRequest);
        assert_eq!(err.code(), "value_out_of_range");
    }

    let stored = db
        .test_case_results()
        .find_unique_or_throw(result.id.clone())
        .await
        .unwrap();
    assert_eq!(stored.test_case, i32::MAX);
    let rows = db
        .test_case_results()
        .select(
            FindArgs::new().filter(Filter::field("id").equals(result.id.clone())),
            &["test_case"],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get("test_case"), Some(&Value::Int(i32::MAX as i64)));

    let updated = db
        .test_case_results()
        .update_many(
            Filter::field("submission_id").equals(submission.id.clone()),
            TestCaseResultUpdate {
                test_case: Some(IntUpdate::Multiply(-1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.count, 1);
}

#[tokio::test]
async fn unique_constraints_are_enforced() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;

    let err = db.users().create(common::new_user("a@x.com")).await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");
    assert_eq!(err.code(), "unique_violation");

    let solved = || NewProblemSolved {
        user_id: user.id.clone(),
        problem_id: problem.id.clone(),
        ..Default::default()
    };
    db.problems_solved().create(solved()).await.unwrap();
    let err = db.problems_solved().create(solved()).await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");

    let playlist = || NewPlaylist {
        name: "Daily".into(),
        user_id: user.id.clone(),
        ..Default::default()
    };
    let created = db.playlists().create(playlist()).await.unwrap();
    let err = db.playlists().create(playlist()).await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");

    let entry = || NewProblemInPlaylist {
        playlist_id: created.id.clone(),
        problem_id: problem.id.clone(),
        ..Default::default()
    };
    db.problems_in_playlist().create(entry()).await.unwrap();
    let err = db.problems_in_playlist().create(entry()).await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");

    let token = || NewTokenBlacklist {
        id: None,
        token: "jwt".into(),
        expires_at: Utc::now() + Duration::hours(1),
    };
    db.token_blacklist().create(token()).await.unwrap();
    let err = db.token_blacklist().create(token()).await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");
}

#[tokio::test]
async fn composite_keys_address_rows() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;
    db.playlists()
        .create(NewPlaylist {
            name: "Daily".into(),
            user_id: user.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let key = PlaylistKey::NameUser {
        name: "Daily".into(),
        user_id: user.id.clone(),
    };
    let renamed = db
        .playlists()
        .update(
            key,
            PlaylistUpdate {
                description: Some(Some("one a day".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.description.as_deref(), Some("one a day"));

    let solved_key = || ProblemSolvedKey::UserProblem {
        user_id: user.id.clone(),
        problem_id: problem.id.clone(),
    };
    let solved = db
        .problems_solved()
        .upsert(
            solved_key(),
            NewProblemSolved {
                user_id: user.id.clone(),
                problem_id: problem.id.clone(),
                ..Default::default()
            },
            Default::default(),
        )
        .await
        .unwrap();
    let again = db
        .problems_solved()
        .upsert(
            solved_key(),
            NewProblemSolved {
                user_id: user.id.clone(),
                problem_id: problem.id.clone(),
                ..Default::default()
            },
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(solved.id, again.id);
    assert_eq!(db.problems_solved().count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_creates_then_updates() {
    let db = common::database().await;
    let key = || UserKey::Email("u@x.com".into());
    let update = || UserUpdate {
        name: Some(Some("Updated".into())),
        ..Default::default()
    };

    let created = db
        .users()
        .upsert(key(), common::new_user("u@x.com"), update())
        .await
        .unwrap();
    assert_eq!(created.name.as_deref(), Some("Ada"));

    let updated = db
        .users()
        .upsert(key(), common::new_user("u@x.com"), update())
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name.as_deref(), Some("Updated"));
}

#[tokio::test]
async fn delete_then_not_found() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;

    let deleted = db.problems().delete(problem.id.clone()).await.unwrap();
    assert_eq!(deleted.id, problem.id);

    assert!(db
        .problems()
        .find_unique(problem.id.clone())
        .await
        .unwrap()
        .is_none());

    let err = db
        .problems()
        .find_unique_or_throw(problem.id.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { model: "Problem" }));
    assert_eq!(err.kind(), ErrorKind::KnownRequest);

    let err = db.problems().delete(problem.id.clone()).await.unwrap_err();
    assert_eq!(err.code(), "record_not_found");

    let err = db
        .problems()
        .update(problem.id.clone(), ProblemUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "record_not_found");
}

#[tokio::test]
async fn foreign_keys_are_checked_and_deletes_cascade() {
    let db = common::database().await;
    let err = db
        .problems()
        .create(codejudge_store::models::NewProblem::new(
            "missing-user",
            "Orphan",
            Difficulty::Hard,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ForeignKeyViolation), "{err:?}");

    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;
    common::submission(&db, &user, &problem).await;
    db.chat_history()
        .create(NewChatHistory {
            user_id: user.id.clone(),
            problem_id: problem.id.clone(),
            message: "hint?".into(),
            response: "try a hash map".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    db.users().delete(UserKey::Id(user.id.clone())).await.unwrap();
    assert_eq!(db.problems().count(None).await.unwrap(), 0);
    assert_eq!(db.submissions().count(None).await.unwrap(), 0);
    assert_eq!(db.chat_history().count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn chat_history_defaults_message_type() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;
    let entry = db
        .chat_history()
        .create(NewChatHistory {
            user_id: user.id.clone(),
            problem_id: problem.id.clone(),
            message: "hint?".into(),
            response: "sort first".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entry.message_type, "general");
}

#[tokio::test]
async fn bulk_writes_report_counts() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problems = [
        common::problem(&db, &user, "A", Difficulty::Easy).await,
        common::problem(&db, &user, "B", Difficulty::Medium).await,
    ];
    let playlist = db
        .playlists()
        .create(NewPlaylist {
            name: "Mixed".into(),
            user_id: user.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let entries = |ids: &[&str]| {
        ids.iter()
            .map(|id| NewProblemInPlaylist {
                playlist_id: playlist.id.clone(),
                problem_id: id.to_string(),
                ..Default::default()
            })
            .collect::<Vec<_>>()
    };

    let added = db
        .problems_in_playlist()
        .create_many(entries(&[&problems[0].id]), false)
        .await
        .unwrap();
    assert_eq!(added.count, 1);

    let added = db
        .problems_in_playlist()
        .create_many(entries(&[&problems[0].id, &problems[1].id]), true)
        .await
        .unwrap();
    assert_eq!(added.count, 1);

    let err = db
        .problems_in_playlist()
        .create_many(entries(&[&problems[0].id]), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }));

    let submission = common::submission(&db, &user, &problems[0]).await;
    let many = (0..120)
        .map(|i| NewTestCaseResult {
            submission_id: submission.id.clone(),
            test_case: i,
            expected: i.to_string(),
            status: "Accepted".into(),
            ..Default::default()
        })
        .collect();
    let inserted = db.test_case_results().create_many(many, false).await.unwrap();
    assert_eq!(inserted.count, 120);

    let updated = db
        .test_case_results()
        .update_many(
            Filter::field("test_case").lt(10),
            TestCaseResultUpdate {
                passed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.count, 10);

    let removed = db
        .problems_in_playlist()
        .delete_many(Filter::field("playlist_id").equals(playlist.id.clone()))
        .await
        .unwrap();
    assert_eq!(removed.count, 2);
}

#[tokio::test]
async fn submission_with_three_results_in_insertion_order() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;
    let submission = common::submission(&db, &user, &problem).await;

    for test_case in 0..3 {
        db.test_case_results()
            .create(NewTestCaseResult {
                submission_id: submission.id.clone(),
                test_case,
                passed: true,
                stdout: Some("3".into()),
                expected: "3".into(),
                status: "Accepted".into(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let loaded = db
        .submissions()
        .find_unique_including(
            submission.id.clone(),
            vec![Include::new("test_case_results").order_by(OrderBy::asc("test_case"))],
        )
        .await
        .unwrap()
        .expect("submission");

    assert_eq!(loaded.record, submission);
    let cases: Vec<i32> = loaded
        .many::<TestCaseResult>("test_case_results")
        .iter()
        .map(|r| r.test_case)
        .collect();
    assert_eq!(cases, [0, 1, 2]);

    let json = serde_json::to_value(&loaded).unwrap();
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["test_case_results"].as_array().map(Vec::len), Some(3));

    let found = db
        .test_case_results()
        .find_many(
            FindArgs::new()
                .filter(Filter::field("submission_id").equals(submission.id.clone()))
                .order_by(OrderBy::desc("test_case")),
        )
        .await
        .unwrap();
    assert_eq!(
        found.iter().map(|r| r.test_case).collect::<Vec<_>>(),
        [2, 1, 0]
    );
}

#[tokio::test]
async fn invalid_inputs_are_rejected_before_sql() {
    let db = common::database().await;

    let err = db
        .users()
        .find_many(FindArgs::new().filter(Filter::field("nope").equals("x")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = db
        .users()
        .find_many(FindArgs::new().filter(Filter::field("role").equals("ROOT")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = db
        .users()
        .find_many(FindArgs::new().filter(Filter::field("email").gt(3)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = db
        .users()
        .select(FindArgs::new(), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
