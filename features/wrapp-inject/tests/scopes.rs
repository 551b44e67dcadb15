use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
    thread,
};

use wrapp_inject::{
    Closable, Container, DependencyKey, DynError, InjectError, Provider, Resource, Scope,
};

struct Counter(usize);

fn counting(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(&wrapp_inject::DiHandle) -> Result<Counter, InjectError> {
    let counter = counter.clone();
    move |_| Ok(Counter(counter.fetch_add(1, Ordering::SeqCst)))
}

#[test]
fn singleton_is_shared_and_transient_is_not() {
    let container = Container::new();
    let built = Arc::new(AtomicUsize::new(0));
    container
        .register(Provider::<Counter>::singleton().factory(counting(&built)))
        .unwrap();
    container
        .register(
            Provider::<String>::transient().factory(|_| Ok::<_, InjectError>("same".to_string())),
        )
        .unwrap();

    let first = container.resolve::<Counter>().unwrap();
    let second = container.resolve::<Counter>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(built.load(Ordering::SeqCst), 1);

    let a = container.resolve::<String>().unwrap();
    let b = container.resolve::<String>().unwrap();
    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(&a, &b));
}

#[test]
fn request_scope_needs_an_activation() {
    let container = Container::new();
    container
        .register(Provider::<Counter>::request().factory(counting(&Arc::new(AtomicUsize::new(0)))))
        .unwrap();

    assert!(matches!(
        container.resolve::<Counter>(),
        Err(InjectError::ScopeNotActive { scope, .. }) if scope == Scope::REQUEST
    ));

    let request = container.scoped_context(Scope::REQUEST).unwrap();
    let first = request.resolve::<Counter>().unwrap();
    let second = request.resolve::<Counter>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A handle outliving its activation no longer resolves scoped values
    let handle = request.handle();
    request.close().unwrap();
    assert!(matches!(
        handle.resolve::<Counter>(),
        Err(InjectError::ScopeNotActive { .. })
    ));
}

#[test]
fn concurrent_requests_on_threads_are_isolated() {
    let container = Container::new();
    let built = Arc::new(AtomicUsize::new(0));
    container
        .register(Provider::<Counter>::request().factory(counting(&built)))
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let container = container.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let request = container.scoped_context(Scope::REQUEST).unwrap();
                barrier.wait();
                let first = request.resolve::<Counter>().unwrap();
                let again = request.resolve::<Counter>().unwrap();
                assert!(Arc::ptr_eq(&first, &again));
                first.0
            })
        })
        .collect();

    let mut seen: Vec<usize> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    seen.sort();
    assert_eq!(seen, vec![0, 1]);
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_requests_on_tasks_are_isolated() {
    let container = Container::new();
    container
        .register(Provider::<Counter>::request().factory(counting(&Arc::new(AtomicUsize::new(0)))))
        .unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let container = container.clone();
            tokio::spawn(async move {
                let request = container.ascoped_context(Scope::REQUEST).await.unwrap();
                let first = request.aresolve::<Counter>().await.unwrap();
                tokio::task::yield_now().await;
                let again = request.aresolve::<Counter>().await.unwrap();
                assert!(Arc::ptr_eq(&first, &again));
                request.aclose().await.unwrap();
                first.0
            })
        })
        .collect();

    let mut seen = Vec::new();
    for task in tasks {
        seen.push(task.await.unwrap());
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 4);
}

#[test]
fn nested_activations_fall_back_to_their_parents() {
    let container = Container::new();
    container.register_scope("batch", &[]).unwrap();
    container.register_scope("task", &[Scope::new("batch")]).unwrap();

    let built = Arc::new(AtomicUsize::new(0));
    container
        .register(Provider::<Counter>::scoped("batch").factory(counting(&built)))
        .unwrap();
    container
        .register(
            Provider::<String>::scoped("task")
                .depends_on::<Arc<Counter>>()
                .factory(|di| {
                    let counter = di.resolve::<Counter>()?;
                    Ok::<_, InjectError>(format!("task of batch {}", counter.0))
                }),
        )
        .unwrap();
    container.build().unwrap();

    let batch = container.scoped_context("batch").unwrap();
    let first = batch.scoped_context("task").unwrap();
    let second = batch.scoped_context("task").unwrap();

    assert_eq!(*first.resolve::<String>().unwrap(), "task of batch 0");
    assert_eq!(*second.resolve::<String>().unwrap(), "task of batch 0");
    assert!(!Arc::ptr_eq(
        &first.resolve::<String>().unwrap(),
        &second.resolve::<String>().unwrap()
    ));
    assert_eq!(built.load(Ordering::SeqCst), 1);

    // A task outside any batch cannot reach batch values
    let orphan = container.scoped_context("task").unwrap();
    assert!(matches!(
        orphan.resolve::<String>(),
        Err(InjectError::ScopeNotActive { scope, .. }) if scope.name() == "batch"
    ));
}

#[test]
fn entering_builtin_or_unknown_scopes_fails() {
    let container = Container::new();
    assert!(matches!(
        container.scoped_context(Scope::SINGLETON),
        Err(InjectError::ReservedScope(_))
    ));
    assert!(matches!(
        container.scoped_context("nope"),
        Err(InjectError::UnknownScope(_))
    ));
    assert!(matches!(
        container.register_scope("task", &[Scope::new("batch")]),
        Err(InjectError::UnknownParentScope { .. })
    ));
    assert!(matches!(
        container.register_scope(Scope::TRANSIENT, &[]),
        Err(InjectError::ReservedScope(_))
    ));
    assert!(matches!(
        container.register_scope(Scope::REQUEST, &[]),
        Err(InjectError::DuplicateScope(_))
    ));
}

#[derive(Debug, PartialEq)]
struct RequestId(u64);
struct Tenant(&'static str);

#[test]
fn context_values_are_set_from_outside() {
    let container = Container::new();
    container
        .register(Provider::<RequestId>::request().from_context())
        .unwrap();

    let request = container.scoped_context(Scope::REQUEST).unwrap();
    assert!(matches!(
        request.resolve::<RequestId>(),
        Err(InjectError::ContextValueMissing { .. })
    ));

    request.set(RequestId(7));
    request.set(Tenant("acme"));
    assert_eq!(*request.resolve::<RequestId>().unwrap(), RequestId(7));
    // Values without a provider are still visible inside the activation
    assert_eq!(request.resolve::<Tenant>().unwrap().0, "acme");
    assert!(request.is_resolved(&DependencyKey::of::<Tenant>()));

    let other = container.scoped_context(Scope::REQUEST).unwrap();
    assert!(matches!(
        other.resolve::<Tenant>(),
        Err(InjectError::UnregisteredDependency { .. })
    ));
}

struct Session;
impl Closable for Session {
    fn close(&self) -> Result<(), DynError> {
        Ok(())
    }
}

#[test]
fn eager_resources_are_built_on_entry() {
    let container = Container::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let open_log = log.clone();
    container
        .register(Provider::<Counter>::request().eager().resource(move |_| {
            open_log.lock().unwrap().push("open");
            let close_log = open_log.clone();
            Ok::<_, InjectError>(Resource::new(Counter(0), move |_| {
                close_log.lock().unwrap().push("close");
                Ok::<_, DynError>(())
            }))
        }))
        .unwrap();
    container
        .register(Provider::<Session>::request().closable(|_| Ok::<_, InjectError>(Session)))
        .unwrap();

    let request = container.scoped_context(Scope::REQUEST).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["open"]);
    assert!(request.is_resolved(&DependencyKey::of::<Counter>()));
    assert!(!request.is_resolved(&DependencyKey::of::<Session>()));

    drop(request);
    assert_eq!(*log.lock().unwrap(), vec!["open", "close"]);
}

#[test]
fn qualified_keys_are_independent() {
    let container = Container::new();
    container
        .register(Provider::<String>::singleton().named("primary").value("db-1".to_string()))
        .unwrap();
    container
        .register(Provider::<String>::singleton().named("replica").value("db-2".to_string()))
        .unwrap();

    assert_eq!(*container.resolve_named::<String>("primary").unwrap(), "db-1");
    assert_eq!(*container.resolve_named::<String>("replica").unwrap(), "db-2");
    assert!(matches!(
        container.resolve::<String>(),
        Err(InjectError::UnregisteredDependency { .. })
    ));
}
