use std::sync::Arc;

use wrapp_inject::{Container, ContainerConfig, DependencyKey, InjectError, Provider, Scope};

#[derive(Debug, PartialEq)]
struct Mailer(&'static str);

struct Notifier {
    mailer: Arc<Mailer>,
}

fn testing_container() -> Container {
    let container = Container::with_config(ContainerConfig::new().testing(true));
    container
        .register(Provider::<Mailer>::singleton().factory(|_| Ok::<_, InjectError>(Mailer("smtp"))))
        .unwrap();
    container
        .register(
            Provider::<Notifier>::singleton()
                .depends_on::<Arc<Mailer>>()
                .factory(|di| Ok::<_, InjectError>(Notifier { mailer: di.resolve()? })),
        )
        .unwrap();
    container.build().unwrap();
    container
}

#[test]
fn override_shadows_a_cached_singleton() {
    let container = testing_container();
    let real = container.resolve::<Mailer>().unwrap();

    {
        let _guard = container.override_with(Mailer("mock")).unwrap();
        assert_eq!(*container.resolve::<Mailer>().unwrap(), Mailer("mock"));

        let request = container.scoped_context(Scope::REQUEST).unwrap();
        assert_eq!(*request.resolve::<Mailer>().unwrap(), Mailer("mock"));
    }

    let after = container.resolve::<Mailer>().unwrap();
    assert!(Arc::ptr_eq(&real, &after));
}

#[test]
fn nested_overrides_unwind_in_order() {
    let container = testing_container();

    let outer = container.override_with(Mailer("outer")).unwrap();
    {
        let _inner = container.override_with(Mailer("inner")).unwrap();
        assert_eq!(*container.resolve::<Mailer>().unwrap(), Mailer("inner"));
    }
    assert_eq!(*container.resolve::<Mailer>().unwrap(), Mailer("outer"));

    drop(outer);
    assert_eq!(*container.resolve::<Mailer>().unwrap(), Mailer("smtp"));
}

#[test]
fn consumers_built_from_an_override_are_not_cached() {
    let container = testing_container();
    let key = DependencyKey::of::<Notifier>();

    {
        let _guard = container.override_with(Mailer("mock")).unwrap();
        let notifier = container.resolve::<Notifier>().unwrap();
        assert_eq!(*notifier.mailer, Mailer("mock"));
        assert!(!container.is_resolved(&key));
    }

    let notifier = container.resolve::<Notifier>().unwrap();
    assert_eq!(*notifier.mailer, Mailer("smtp"));
    assert!(container.is_resolved(&key));
}

#[test]
fn cached_consumers_are_rebuilt_around_an_override() {
    let container = testing_container();
    let real = container.resolve::<Notifier>().unwrap();
    assert_eq!(*real.mailer, Mailer("smtp"));

    {
        let _guard = container.override_with(Mailer("mock")).unwrap();
        let shadowed = container.resolve::<Notifier>().unwrap();
        assert_eq!(*shadowed.mailer, Mailer("mock"));
        assert!(!Arc::ptr_eq(&real, &shadowed));
        assert!(container.is_resolved(&DependencyKey::of::<Notifier>()));
    }

    let after = container.resolve::<Notifier>().unwrap();
    assert!(Arc::ptr_eq(&real, &after));
}

#[test]
fn overrides_need_testing_mode() {
    let container = Container::new();
    container
        .register(Provider::<Mailer>::singleton().value(Mailer("smtp")))
        .unwrap();

    assert!(matches!(
        container.override_with(Mailer("mock")),
        Err(InjectError::OverridesDisabled)
    ));
}

#[test]
fn strict_overrides_need_a_registration() {
    let lenient = Container::with_config(ContainerConfig::new().testing(true));
    {
        let _guard = lenient.override_named("sender", Mailer("mock")).unwrap();
        assert_eq!(*lenient.resolve_named::<Mailer>("sender").unwrap(), Mailer("mock"));
    }
    assert!(matches!(
        lenient.resolve_named::<Mailer>("sender"),
        Err(InjectError::UnregisteredDependency { .. })
    ));

    let strict = Container::with_config(ContainerConfig::new().testing(true).strict(true));
    assert!(matches!(
        strict.override_with(Mailer("mock")),
        Err(InjectError::NotRegistered(_))
    ));
}

#[tokio::test]
async fn overrides_apply_to_async_resolution() {
    let container = testing_container();
    let _guard = container.override_with(Mailer("mock")).unwrap();

    let notifier = container.aresolve::<Notifier>().await.unwrap();
    assert_eq!(*notifier.mailer, Mailer("mock"));
}
