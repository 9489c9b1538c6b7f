/// Save blocker tests
///
/// Blocker propagation through parents and dependent collections, deferred
/// blockers, and how blockers interact with saving.
/// Run with: cargo test --test save_blocker_tests
use relcache::{
    CacheConfig, Collection, InMemoryTransport, Relationship, RelationshipKind, Resource,
    SaveOutcome, Session, Topic,
};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn session() -> (Session, Rc<InMemoryTransport>) {
    Session::in_memory(CacheConfig::default()).unwrap()
}

fn determinations() -> Relationship {
    Relationship::new(
        "collectionObject",
        "determination",
        "collectionobject",
        RelationshipKind::ManyToOne,
    )
    .dependent(true)
    .reverse("determinations")
}

fn record(log: &Log, resource: &Resource, label: &str, topics: &[Topic]) {
    for topic in topics {
        let log = log.clone();
        let entry = format!("{} {}", label, topic);
        resource.on(topic.clone(), move |_| log.borrow_mut().push(entry.clone()));
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow_mut().drain(..).collect()
}

#[tokio::test]
async fn test_blocker_propagates_to_collection_related() {
    let (session, _) = session();
    let parent = session.create("collectionobject");
    let child = session.create("determination");
    let _collection = Collection::dependent("determination", &parent, determinations(), vec![child.clone()]).unwrap();

    let log: Log = Rc::default();
    let topics = [Topic::SaveBlocked, Topic::OkToSave];
    record(&log, &child, "R", &topics);
    record(&log, &parent, "P", &topics);

    child.save_blockers().add("k", Some("name"), "bad", false);
    assert_eq!(entries(&log), vec!["R saveblocked", "P saveblocked"]);
    assert!(parent.save_blockers().is_blocking(&child));
    assert!(parent.save_blockers().is_blocked());

    child.save_blockers().remove("k");
    assert_eq!(entries(&log), vec!["R oktosave", "P oktosave"]);
    assert!(!parent.save_blockers().is_blocking(&child));
    assert!(!parent.save_blockers().is_blocked());
}

#[tokio::test]
async fn test_nested_child_blocks_top_level_form() {
    let (session, _) = session();
    let top = session.create("collectionobject");
    let determination = session.create("determination");
    let _collection =
        Collection::dependent("determination", &top, determinations(), vec![determination.clone()]).unwrap();
    let taxon_note = session.create_child("determinationcitation", &determination);

    taxon_note.save_blockers().add("ref", None, "missing reference", false);
    assert!(determination.save_blockers().is_blocking(&taxon_note));
    assert!(top.save_blockers().is_blocking(&taxon_note));

    taxon_note.save_blockers().remove("ref");
    assert!(!top.save_blockers().is_blocked());
    assert!(!determination.save_blockers().is_blocked());
}

#[tokio::test]
async fn test_oktosave_waits_for_last_blocker() {
    let (session, _) = session();
    let parent = session.create("collectionobject");
    let child = session.create("determination");
    let _collection = Collection::dependent("determination", &parent, determinations(), vec![child.clone()]).unwrap();

    let log: Log = Rc::default();
    record(&log, &parent, "P", &[Topic::OkToSave]);
    record(&log, &child, "R", &[Topic::no_save_blockers_on("name")]);

    child.save_blockers().add("a", Some("name"), "too short", false);
    child.save_blockers().add("b", Some("name"), "not unique", false);
    assert_eq!(child.save_blockers().get_field_errors("NAME"), vec!["too short", "not unique"]);

    child.save_blockers().remove("a");
    assert!(entries(&log).is_empty());
    assert!(parent.save_blockers().is_blocked());

    child.save_blockers().remove("b");
    assert_eq!(entries(&log), vec!["R nosaveblockers: name", "P oktosave"]);
}

#[tokio::test]
async fn test_deferred_blockers_stay_silent_until_fired() {
    let (session, _) = session();
    let parent = session.create("collectionobject");
    let child = session.create("determination");
    let _collection = Collection::dependent("determination", &parent, determinations(), vec![child.clone()]).unwrap();

    let log: Log = Rc::default();
    record(&log, &child, "R", &[Topic::SaveBlocked, Topic::BlockersChanged]);
    record(&log, &parent, "P", &[Topic::SaveBlocked]);

    child.save_blockers().add("k", None, "reason", true);
    assert_eq!(entries(&log), vec!["R blockerschanged"]);
    assert!(child.save_blockers().has_only_deferred_blockers());
    assert!(!parent.save_blockers().is_blocked());

    child.save_blockers().fire_deferred_blockers();
    assert_eq!(entries(&log), vec!["R saveblocked", "P saveblocked"]);
    assert!(!child.save_blockers().has_only_deferred_blockers());
    assert!(!parent.save_blockers().blocking_has_only_deferred_blockers());
    assert!(!child.save_blockers().get("k").unwrap().deferred);
}

#[tokio::test]
async fn test_save_reports_first_blocker_and_sends_nothing() {
    let (session, server) = session();
    let parent = session.create("collectionobject");
    let first = session.create("determination");
    let second = session.create("determination");
    let _collection = Collection::dependent(
        "determination",
        &parent,
        determinations(),
        vec![first.clone(), second.clone()],
    )
    .unwrap();

    first.save_blockers().add("taxon", Some("taxon"), "unknown taxon", true);
    second.save_blockers().add("date", Some("determineddate"), "in the future", false);

    match parent.save().await.unwrap() {
        SaveOutcome::Blocked { blocker, others } => {
            assert!(blocker.resource.ptr_eq(&second));
            assert_eq!(blocker.key, "date");
            assert_eq!(others.len(), 1);
            assert!(others[0].resource.ptr_eq(&first));
        }
        SaveOutcome::Saved => panic!("save must be blocked"),
    }
    assert_eq!(server.request_count(), 0);
    assert!(!first.save_blockers().has_only_deferred_blockers());
    assert_eq!(session.diagnostics().report().len(), 2);
}

#[tokio::test]
async fn test_save_fires_deferred_blockers_of_structural_children() {
    let (session, server) = session();
    let parent = session.create("collectionobject");
    parent.set("catalognumber", "2024-0002");
    let child = session.create_child("collectingeventattribute", &parent);
    let grandchild = session.create_child("attachment", &child);
    grandchild.save_blockers().add("k", None, "required", true);
    assert!(!parent.save_blockers().is_blocked());

    match parent.save().await.unwrap() {
        SaveOutcome::Blocked { blocker, others } => {
            assert!(blocker.resource.ptr_eq(&grandchild));
            assert_eq!(blocker.key, "k");
            assert!(others.is_empty());
        }
        SaveOutcome::Saved => panic!("save must be blocked"),
    }
    assert_eq!(server.request_count(), 0);
    assert!(!grandchild.save_blockers().has_only_deferred_blockers());
    assert!(parent.save_blockers().is_blocking(&grandchild));
    assert!(child.save_blockers().is_blocking(&grandchild));
}

#[tokio::test]
async fn test_independent_member_does_not_block_related_save() {
    let (session, server) = session();
    let co_id = server.insert("collectionobject", json!({"catalognumber": "000001"}));
    let co = session.resource_with_id("collectionobject", co_id);
    let preparation = session.resource_with_id("preparation", 5);
    let field = Relationship::new(
        "collectionobject",
        "preparation",
        "collectionobject",
        RelationshipKind::ManyToOne,
    )
    .reverse("preparations");
    let _preparations = Collection::independent("preparation", &co, field, vec![preparation.clone()]).unwrap();

    preparation.save_blockers().add("k", None, "bad", false);
    assert!(preparation.save_blockers().is_blocked());
    assert!(!co.save_blockers().is_blocked());
    assert!(co.save().await.unwrap().is_saved());
}

#[tokio::test]
async fn test_removed_member_withdraws_its_blockers() {
    let (session, _) = session();
    let parent = session.create("collectionobject");
    let child = session.create("determination");
    let collection = Collection::dependent("determination", &parent, determinations(), vec![child.clone()]).unwrap();

    child.save_blockers().add("k", None, "bad", false);
    assert!(parent.save_blockers().is_blocked());

    assert!(collection.remove(&child));
    assert!(!parent.save_blockers().is_blocked());

    // Re-adding a still-blocked member blocks the parent again.
    collection.add(child.clone()).unwrap();
    assert!(parent.save_blockers().is_blocking(&child));
}

#[tokio::test]
async fn test_destroyed_member_unblocks_parent() {
    let (session, _) = session();
    let parent = session.create("collectionobject");
    let child = session.create("determination");
    let collection = Collection::dependent("determination", &parent, determinations(), vec![child.clone()]).unwrap();

    child.save_blockers().add("k", None, "bad", false);
    child.destroy().await.unwrap();

    assert!(!parent.save_blockers().is_blocked());
    assert!(collection.is_empty());
}

#[tokio::test]
async fn test_cyclic_graph_terminates() {
    let (session, _) = session();
    let agent = session.create("agent");
    let address = session.create_child("agent", &agent);
    let field = Relationship::new("agent", "agent", "agent", RelationshipKind::ManyToOne).dependent(true);
    let _collection = Collection::dependent("agent", &address, field, vec![agent.clone()]).unwrap();

    let log: Log = Rc::default();
    record(&log, &agent, "A", &[Topic::SaveBlocked]);
    record(&log, &address, "B", &[Topic::SaveBlocked]);

    agent.save_blockers().add("k", None, "loop", false);
    assert_eq!(entries(&log), vec!["A saveblocked", "B saveblocked"]);
    assert!(address.save_blockers().is_blocking(&agent));
}

#[tokio::test]
async fn test_save_back_patches_dependent_members() {
    let (session, server) = session();
    // Next id handed out by the server is 7.
    server.insert("collectionobject", json!({"id": 6}));

    let related = session.create("collectionobject");
    related.set("catalognumber", "2024-0001");
    let member = session.create("determination");
    member.set("iscurrent", true);
    let determinations =
        Collection::dependent("determination", &related, determinations(), vec![member.clone()]).unwrap();

    let outcome = related.save().await.unwrap();
    assert!(outcome.is_saved());
    assert_eq!(related.id(), Some(7));
    assert_eq!(member.get("collectionobject"), Some(json!(related.url())));
    assert_eq!(related.url(), "/api/specify/collectionobject/7/");
    assert!(!member.is_new());
    assert!(!related.needs_save());
    assert!(!member.needs_save());

    let stored = server.row("collectionobject", 7).unwrap();
    assert_eq!(stored["catalognumber"], json!("2024-0001"));
    assert_eq!(stored["determinations"][0]["iscurrent"], json!(true));
    assert!(determinations.contains(&member));
}
