use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wrapp_inject::{Closable, DiBuilder, DynError, InjectError, Provider, Scope};

fn main() -> Result<(), InjectError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let container = DiBuilder::new()
        .add_instance(Settings {
            url: "postgres://localhost/demo",
        })
        .add_provider(
            Provider::<Database>::singleton()
                .depends_on::<Arc<Settings>>()
                .closable(|di| {
                    let settings = di.resolve::<Settings>()?;
                    Ok::<_, InjectError>(Database { url: settings.url })
                }),
        )
        .add_provider(
            Provider::<Repository>::singleton()
                .depends_on::<Arc<Database>>()
                .factory(|di| Ok::<_, InjectError>(Repository { db: di.resolve()? })),
        )
        .add_provider(Provider::<RequestId>::request().from_context())
        .add_provider(
            Provider::<Service>::transient()
                .depends_on::<Arc<Repository>>()
                .factory(|di| Ok::<_, InjectError>(Service { repository: di.resolve()? })),
        )
        .add_provider(
            Provider::<Handler>::request()
                .depends_on::<Arc<Service>>()
                .depends_on::<Arc<RequestId>>()
                .factory(|di| {
                    Ok::<_, InjectError>(Handler {
                        service: di.resolve()?,
                        request: di.resolve()?,
                    })
                }),
        )
        .build()?;

    println!("{:?}", container);
    container.start()?;

    let first = container.resolve::<Service>()?;
    let second = container.resolve::<Service>()?;
    println!(
        "distinct services: {}, shared repository: {}",
        !Arc::ptr_eq(&first, &second),
        Arc::ptr_eq(&first.repository, &second.repository)
    );

    for id in 1..=2 {
        let request = container.scoped_context(Scope::REQUEST)?;
        request.set(RequestId(id));
        let handler = request.resolve::<Handler>()?;
        handler.handle();
        request.close()?;
    }

    futures::executor::block_on(container.aclose())
}

struct Settings {
    url: &'static str,
}

struct Database {
    url: &'static str,
}
impl Closable for Database {
    fn open(&self) -> Result<(), DynError> {
        println!("connect {}", self.url);
        Ok(())
    }

    fn close(&self) -> Result<(), DynError> {
        println!("disconnect {}", self.url);
        Ok(())
    }
}

struct Repository {
    db: Arc<Database>,
}

struct Service {
    repository: Arc<Repository>,
}

#[derive(Debug)]
struct RequestId(u64);

struct Handler {
    service: Arc<Service>,
    request: Arc<RequestId>,
}
impl Handler {
    fn handle(&self) {
        println!(
            "handling {:?} against {}",
            self.request, self.service.repository.db.url
        );
    }
}
