use std::sync::Arc;

use polystore::backends::dynamo::DynamoBackend;
use polystore::backends::oql::OqlBackend;
use polystore::backends::redis::RedisBackend;
use polystore::{
    restrict, Backend, DataType, Datastore, DatastoreConfig, DbError, EntityData, EntityHandle,
    MappingContext, Order, PersistentEntity, PersistentProperty, Projection, QueryResult, Session,
    Value,
};

fn datastore(backend: Box<dyn Backend>) -> Arc<Datastore> {
    let mut context = MappingContext::new();
    context.register(
        PersistentEntity::build("Person")
            .property(PersistentProperty::new("name", DataType::Text).indexed())
            .property(PersistentProperty::new("age", DataType::Integer).indexed())
            .property(PersistentProperty::new("bio", DataType::Text)),
    );
    Arc::new(
        Datastore::new(context, backend, DatastoreConfig::default()).unwrap(),
    )
}

fn seed(session: &mut Session) {
    for (name, age) in [("Ann", 30i64), ("Bob", 25i64), ("Bea", 35i64), ("Carl", 25i64)] {
        let person = EntityData::new("Person")
            .with("name", name)
            .with("age", age)
            .into_handle();
        session.persist(&person).unwrap();
    }
    session.flush().unwrap();
}

fn names(result: QueryResult<EntityHandle>) -> Vec<String> {
    let mut names: Vec<String> = result
        .entities()
        .iter()
        .map(|h| h.borrow().get("name").unwrap().to_storage_string())
        .collect();
    names.sort();
    names
}

fn ordered_names(result: QueryResult<EntityHandle>) -> Vec<String> {
    result
        .entities()
        .iter()
        .map(|h| h.borrow().get("name").unwrap().to_storage_string())
        .collect()
}

// --- object query backend ---------------------------------------------------

#[test]
fn test_oql_equality_and_comparison() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().eq("name", "Ann");
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann"]);
    let one = session.single_result(&query).unwrap().unwrap();
    assert_eq!(one.borrow().get("age"), Some(&Value::Integer(30)));

    let query = session.query("Person").unwrap().gt("age", 26i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);

    let query = session
        .query("Person")
        .unwrap()
        .between("age", 25i64, 30i64);
    assert_eq!(
        names(session.execute(&query).unwrap()),
        vec!["Ann", "Bob", "Carl"]
    );
}

#[test]
fn test_oql_disjunction_and_like() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().criterion(restrict::disjunction(vec![
        restrict::eq("name", "Ann"),
        restrict::eq("name", "Bob"),
    ]));
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bob"]);

    let query = session.query("Person").unwrap().like("name", "B%");
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Bea", "Bob"]);
}

#[test]
fn test_oql_negation() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .criterion(restrict::negation(polystore::query::Junction::Conjunction(
            vec![restrict::eq("age", 25i64)],
        )));
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);
}

#[test]
fn test_oql_order_and_pagination() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .order_by(Order::asc("age"))
        .order_by(Order::asc("name"))
        .skip(1)
        .max_results(2);
    assert_eq!(
        ordered_names(session.execute(&query).unwrap()),
        vec!["Carl", "Ann"]
    );
}

#[test]
fn test_oql_projections() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .gt("age", 24i64)
        .projection(Projection::Count);
    assert_eq!(
        session.execute(&query).unwrap().values(),
        vec![Value::Integer(4)]
    );

    let query = session
        .query("Person")
        .unwrap()
        .projection(Projection::Min("age".into()))
        .projection(Projection::Max("age".into()));
    assert_eq!(
        session.execute(&query).unwrap().values(),
        vec![Value::Integer(25), Value::Integer(35)]
    );
}

#[test]
fn test_oql_empty_disjunction_matches_nothing() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .criterion(restrict::disjunction(vec![]));
    assert!(session.execute(&query).unwrap().is_empty());
}

// --- set-algebra backend ----------------------------------------------------

#[test]
fn test_redis_indexed_equality() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().eq("age", 25i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Bob", "Carl"]);
}

#[test]
fn test_redis_conjunction_intersects_indexes() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .eq("age", 25i64)
        .eq("name", "Bob");
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Bob"]);
}

#[test]
fn test_redis_range_queries() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().gt("age", 25i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);

    let query = session.query("Person").unwrap().ge("age", 30i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);

    let query = session
        .query("Person")
        .unwrap()
        .between("age", 25i64, 30i64);
    assert_eq!(
        names(session.execute(&query).unwrap()),
        vec!["Ann", "Bob", "Carl"]
    );

    let query = session.query("Person").unwrap().lt("age", 30i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Bob", "Carl"]);
}

#[test]
fn test_redis_not_equals_and_in_list() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().ne("age", 25i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);

    let query = session.query("Person").unwrap().in_list(
        "name",
        vec![Value::Text("Ann".into()), Value::Text("Carl".into())],
    );
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Carl"]);
}

#[test]
fn test_redis_like_prefix() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().like("name", "B%");
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Bea", "Bob"]);

    // A pattern matching nothing resolves to an empty set, not an error
    let query = session.query("Person").unwrap().like("name", "Z%");
    assert!(session.execute(&query).unwrap().is_empty());
}

#[test]
fn test_redis_id_equals() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();

    let person = EntityData::new("Person")
        .with("name", "Ann")
        .with("age", 30i64)
        .into_handle();
    let id = session.persist(&person).unwrap();
    session.flush().unwrap();

    let query = session.query("Person").unwrap().id_eq(id);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann"]);

    let query = session.query("Person").unwrap().id_eq("no-such-id");
    assert!(session.execute(&query).unwrap().is_empty());
}

#[test]
fn test_redis_order_rides_server_sort() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .gt("age", 24i64)
        .order_by(Order::desc("age"));
    let by_age = ordered_names(session.execute(&query).unwrap());
    assert_eq!(&by_age[..2], &["Bea".to_string(), "Ann".to_string()]);

    let query = session
        .query("Person")
        .unwrap()
        .order_by(Order::asc("name"))
        .max_results(2);
    assert_eq!(
        ordered_names(session.execute(&query).unwrap()),
        vec!["Ann", "Bea"]
    );
}

#[test]
fn test_redis_count_and_extremes() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .eq("age", 25i64)
        .projection(Projection::Count);
    assert_eq!(
        session.execute(&query).unwrap().values(),
        vec![Value::Integer(2)]
    );

    let query = session
        .query("Person")
        .unwrap()
        .projection(Projection::Min("age".into()))
        .projection(Projection::Max("age".into()));
    assert_eq!(
        session.execute(&query).unwrap().values(),
        vec![Value::Integer(25), Value::Integer(35)]
    );

    let query = session
        .query("Person")
        .unwrap()
        .projection(Projection::CountDistinct("age".into()));
    assert_eq!(
        session.execute(&query).unwrap().values(),
        vec![Value::Integer(3)]
    );
}

#[test]
fn test_redis_unindexed_property_rejected() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().eq("bio", "whatever");
    assert!(matches!(
        session.execute(&query),
        Err(DbError::DataRetrievalFailure(_))
    ));
}

#[test]
fn test_redis_sum_projection_unsupported() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .projection(Projection::Sum("age".into()));
    assert!(matches!(
        session.execute(&query),
        Err(DbError::UnsupportedProjection(_))
    ));
}

#[test]
fn test_redis_index_follows_update_and_delete() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let mut session = datastore.connect();

    let person = EntityData::new("Person")
        .with("name", "Ann")
        .with("age", 30i64)
        .into_handle();
    session.persist(&person).unwrap();
    session.flush().unwrap();

    // Update moves the record between index sets
    person.borrow_mut().set("age", 31i64);
    session.persist(&person).unwrap();
    session.flush().unwrap();

    let query = session.query("Person").unwrap().eq("age", 30i64);
    assert!(session.execute(&query).unwrap().is_empty());
    let query = session.query("Person").unwrap().eq("age", 31i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann"]);

    // Delete clears the index entries
    session.delete(&person).unwrap();
    session.flush().unwrap();
    let mut other = datastore.connect();
    let query = other.query("Person").unwrap().eq("age", 31i64);
    assert!(other.execute(&query).unwrap().is_empty());
}

// --- item-table backend -----------------------------------------------------

#[test]
fn test_dynamo_scan_equality() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session.query("Person").unwrap().eq("name", "Ann");
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann"]);

    // Numeric comparison, not lexical: 25 < 30 even as item strings
    let query = session.query("Person").unwrap().gt("age", 25i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);
}

#[test]
fn test_dynamo_disjunction_scans_each_alternative() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    // (name = Ann OR name = Bob) AND age >= 25 flattens to two scans
    let query = session
        .query("Person")
        .unwrap()
        .criterion(restrict::disjunction(vec![
            restrict::eq("name", "Ann"),
            restrict::eq("name", "Bob"),
        ]))
        .ge("age", 25i64);
    assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bob"]);

    // Overlapping alternatives deduplicate by identifier
    let query = session.query("Person").unwrap().criterion(restrict::disjunction(vec![
        restrict::like("name", "B%"),
        restrict::eq("age", 25i64),
    ]));
    assert_eq!(
        names(session.execute(&query).unwrap()),
        vec!["Bea", "Bob", "Carl"]
    );
}

#[test]
fn test_dynamo_empty_disjunction_matches_nothing() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .criterion(restrict::disjunction(vec![]));
    assert!(session.execute(&query).unwrap().is_empty());
}

#[test]
fn test_dynamo_order_applies_in_memory() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .order_by(Order::asc("age"))
        .order_by(Order::asc("name"))
        .max_results(3);
    assert_eq!(
        ordered_names(session.execute(&query).unwrap()),
        vec!["Bob", "Carl", "Ann"]
    );
}

#[test]
fn test_dynamo_count_and_id_projections() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .eq("age", 25i64)
        .projection(Projection::Count);
    assert_eq!(
        session.execute(&query).unwrap().values(),
        vec![Value::Integer(2)]
    );

    let query = session.query("Person").unwrap().projection(Projection::Id);
    assert_eq!(session.execute(&query).unwrap().len(), 4);
}

#[test]
fn test_dynamo_negation_unsupported() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .criterion(restrict::negation(polystore::query::Junction::Conjunction(
            vec![restrict::eq("name", "Ann")],
        )));
    assert!(matches!(
        session.execute(&query),
        Err(DbError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_dynamo_min_projection_unsupported() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let mut session = datastore.connect();
    seed(&mut session);

    let query = session
        .query("Person")
        .unwrap()
        .projection(Projection::Min("age".into()));
    assert!(matches!(
        session.execute(&query),
        Err(DbError::UnsupportedProjection(_))
    ));
}

// --- cross-backend agreement ------------------------------------------------

#[test]
fn test_backends_agree_on_flattened_query() {
    let backends: Vec<Box<dyn Backend>> = vec![
        Box::new(OqlBackend::in_memory()),
        Box::new(RedisBackend::in_memory()),
        Box::new(DynamoBackend::in_memory()),
    ];
    for backend in backends {
        let datastore = datastore(backend);
        let mut session = datastore.connect();
        seed(&mut session);

        let query = session
            .query("Person")
            .unwrap()
            .criterion(restrict::disjunction(vec![
                restrict::eq("name", "Ann"),
                restrict::eq("name", "Bea"),
            ]))
            .ge("age", 28i64);
        assert_eq!(names(session.execute(&query).unwrap()), vec!["Ann", "Bea"]);
    }
}

#[test]
fn test_unknown_property_rejected_before_compilation() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let mut session = datastore.connect();

    let query = session.query("Person").unwrap().eq("missing", "x");
    assert!(matches!(
        session.execute(&query),
        Err(DbError::PropertyNotFound(_, _))
    ));
}
