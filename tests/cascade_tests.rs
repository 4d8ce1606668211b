use std::rc::Rc;
use std::sync::Arc;

use polystore::backends::oql::OqlBackend;
use polystore::engine::{AssociationValue, Ref};
use polystore::{
    Association, AssociationKind, CascadeType, DataType, Datastore, DatastoreConfig, EntityData,
    MappingContext, PersistentEntity, PersistentProperty, Value,
};

fn datastore() -> Arc<Datastore> {
    let mut context = MappingContext::new();
    context.register(
        PersistentEntity::build("Owner")
            .property(PersistentProperty::new("name", DataType::Text))
            .association(
                Association::new("pets", "Pet", AssociationKind::OneToMany)
                    .cascade(CascadeType::Persist)
                    .cascade(CascadeType::Remove)
                    .bidirectional("owner"),
            ),
    );
    context.register(
        PersistentEntity::build("Pet")
            .child_of_root()
            .property(PersistentProperty::new("name", DataType::Text))
            .association(
                Association::new("owner", "Owner", AssociationKind::ToOne).owned_by_other_side(),
            ),
    );
    context.register(
        PersistentEntity::build("Person")
            .property(PersistentProperty::new("name", DataType::Text))
            .association(
                Association::new("spouse", "Person", AssociationKind::ToOne)
                    .cascade(CascadeType::Persist)
                    .bidirectional("spouse"),
            ),
    );
    Arc::new(
        Datastore::new(
            context,
            Box::new(OqlBackend::in_memory()),
            DatastoreConfig::default(),
        )
        .unwrap(),
    )
}

#[test]
fn test_cascade_persists_children() {
    let datastore = datastore();
    let mut session = datastore.connect();

    let rex = EntityData::new("Pet").with("name", "Rex").into_handle();
    let ada = EntityData::new("Pet").with("name", "Ada").into_handle();
    let mut owner = EntityData::new("Owner").with("name", "Ann");
    owner.set_many(
        "pets",
        vec![Ref::Resolved(Rc::clone(&rex)), Ref::Resolved(Rc::clone(&ada))],
    );
    let owner = owner.into_handle();

    let owner_id = session.persist(&owner).unwrap();
    // One operation per instance: the owner plus both children
    assert_eq!(session.pending_count(), 3);
    session.flush().unwrap();

    let rex_id = rex.borrow().identifier().cloned().unwrap();
    let mut probe = datastore.connect();
    let loaded_rex = probe.retrieve("Pet", rex_id).unwrap().unwrap();
    assert_eq!(
        loaded_rex.borrow().get("name"),
        Some(&Value::Text("Rex".into()))
    );
    assert!(probe.retrieve("Owner", owner_id).unwrap().is_some());
}

#[test]
fn test_bidirectional_inverse_is_fixed_up() {
    let datastore = datastore();
    let mut session = datastore.connect();

    let rex = EntityData::new("Pet").with("name", "Rex").into_handle();
    let mut owner = EntityData::new("Owner").with("name", "Ann");
    owner.set_many("pets", vec![Ref::Resolved(Rc::clone(&rex))]);
    let owner = owner.into_handle();

    let owner_id = session.persist(&owner).unwrap();
    session.flush().unwrap();

    // The child observed the link in memory before flush
    match rex.borrow().association("owner") {
        Some(AssociationValue::One(Ref::Resolved(handle))) => {
            assert!(Rc::ptr_eq(handle, &owner));
        }
        other => panic!("expected resolved owner link, got {:?}", other),
    }

    // And the stored child entry carries the owner's key
    let rex_id = rex.borrow().identifier().cloned().unwrap();
    let mut probe = datastore.connect();
    let loaded = probe.retrieve("Pet", rex_id).unwrap().unwrap();
    match loaded.borrow().association("owner") {
        Some(AssociationValue::One(reference)) => {
            assert_eq!(reference.identifier(), Some(owner_id));
        }
        other => panic!("expected owner reference, got {:?}", other),
    }
}

#[test]
fn test_resolve_loads_to_many_association() {
    let datastore = datastore();
    let mut session = datastore.connect();

    let rex = EntityData::new("Pet").with("name", "Rex").into_handle();
    let ada = EntityData::new("Pet").with("name", "Ada").into_handle();
    let mut owner = EntityData::new("Owner").with("name", "Ann");
    owner.set_many(
        "pets",
        vec![Ref::Resolved(rex), Ref::Resolved(ada)],
    );
    let owner_id = session.persist(&owner.into_handle()).unwrap();
    session.flush().unwrap();

    let mut probe = datastore.connect();
    let loaded = probe.retrieve("Owner", owner_id).unwrap().unwrap();
    let pets = probe.resolve(&loaded, "pets").unwrap();
    assert_eq!(pets.len(), 2);
    let mut names: Vec<String> = pets
        .iter()
        .map(|pet| pet.borrow().get("name").unwrap().to_storage_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Ada".to_string(), "Rex".to_string()]);
}

#[test]
fn test_cascade_cycle_terminates() {
    let datastore = datastore();
    let mut session = datastore.connect();

    // Two instances referencing each other through a cascading association
    let ann = EntityData::new("Person").with("name", "Ann").into_handle();
    let bob = EntityData::new("Person").with("name", "Bob").into_handle();
    ann.borrow_mut()
        .set_to_one("spouse", Ref::Resolved(Rc::clone(&bob)));
    bob.borrow_mut()
        .set_to_one("spouse", Ref::Resolved(Rc::clone(&ann)));

    let ann_id = session.persist(&ann).unwrap();
    session.flush().unwrap();

    let bob_id = bob.borrow().identifier().cloned().unwrap();
    assert_ne!(ann_id, bob_id);

    let mut probe = datastore.connect();
    let loaded_ann = probe.retrieve("Person", ann_id.clone()).unwrap().unwrap();
    let spouse = probe.resolve(&loaded_ann, "spouse").unwrap();
    assert_eq!(spouse.len(), 1);
    assert_eq!(spouse[0].borrow().identifier(), Some(&bob_id));

    let loaded_bob = probe.retrieve("Person", bob_id).unwrap().unwrap();
    let back = probe.resolve(&loaded_bob, "spouse").unwrap();
    assert_eq!(back[0].borrow().identifier(), Some(&ann_id));
}

#[test]
fn test_cascade_remove_deletes_children() {
    let datastore = datastore();
    let mut session = datastore.connect();

    let rex = EntityData::new("Pet").with("name", "Rex").into_handle();
    let mut owner = EntityData::new("Owner").with("name", "Ann");
    owner.set_many("pets", vec![Ref::Resolved(Rc::clone(&rex))]);
    let owner_id = session.persist(&owner.into_handle()).unwrap();
    session.flush().unwrap();
    let rex_id = rex.borrow().identifier().cloned().unwrap();

    // Delete through a fresh session, so children arrive as unresolved keys
    let mut other = datastore.connect();
    let loaded = other.retrieve("Owner", owner_id.clone()).unwrap().unwrap();
    other.delete(&loaded).unwrap();
    other.flush().unwrap();

    let mut probe = datastore.connect();
    assert!(probe.retrieve("Owner", owner_id).unwrap().is_none());
    assert!(probe.retrieve("Pet", rex_id).unwrap().is_none());
}

#[test]
fn test_unresolved_reference_is_written_without_cascade() {
    let datastore = datastore();
    let mut session = datastore.connect();

    // A reference by raw key cascades nothing; the key is stored as-is
    let mut owner = EntityData::new("Owner").with("name", "Ann");
    owner.set_many("pets", vec![Ref::Unresolved(Value::Text("ghost".into()))]);
    let owner_id = session.persist(&owner.into_handle()).unwrap();
    assert_eq!(session.pending_count(), 1);
    session.flush().unwrap();

    let mut probe = datastore.connect();
    let loaded = probe.retrieve("Owner", owner_id).unwrap().unwrap();
    match loaded.borrow().association("pets") {
        Some(AssociationValue::Many(refs)) => {
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].identifier(), Some(Value::Text("ghost".into())));
        }
        other => panic!("expected unresolved keys, got {:?}", other),
    }
}
