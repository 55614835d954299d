//! Basic example of the Graft DI container.

use graft::prelude::*;
use std::sync::Arc;

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

impl Component for ConsoleLogger {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(ConsoleLogger)
    }
}

graft::implements!(ConsoleLogger => dyn Logger);

struct Config {
    database_url: String,
}

struct Database {
    url: String,
    logger: Arc<dyn Logger>,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        self.logger.log(&format!("Executing: {sql}"));
        format!("Results from {}", self.url)
    }
}

impl Component for Database {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::on::<Config>("config"),
            Dependency::on::<dyn Logger>("logger"),
        ]
    }

    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        let config: Arc<Config> = args.get()?;
        Ok(Database {
            url: config.database_url.clone(),
            logger: args.get()?,
        })
    }

    fn disposer() -> Option<fn(&Self)> {
        Some(|db| db.logger.log(&format!("Closing connection to {}", db.url)))
    }
}

struct UnitOfWork {
    db: Arc<Database>,
}

impl Component for UnitOfWork {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<Database>("db")]
    }

    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(UnitOfWork { db: args.get()? })
    }

    fn disposer() -> Option<fn(&Self)> {
        Some(|_| println!("[UOW] committed"))
    }
}

struct UserService {
    work: Arc<UnitOfWork>,
    logger: Arc<dyn Logger>,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        self.logger.log(&format!("Getting user {id}"));
        self.work.db.query(&format!("SELECT * FROM users WHERE id = {id}"))
    }
}

impl Component for UserService {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::on::<UnitOfWork>("work"),
            Dependency::on::<dyn Logger>("logger"),
        ]
    }

    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(UserService {
            work: args.get()?,
            logger: args.get()?,
        })
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter("graft_container=debug")
        .init();

    let container = Container::new();

    // Config: an existing value
    container.register_instance(Arc::new(Config {
        database_url: "postgres://localhost/myapp".to_string(),
    }))?;
    // Logger and database: one per container
    container.register_singleton::<dyn Logger, ConsoleLogger>()?;
    container.register_singleton::<Database, Database>()?;
    // Unit of work and service: one per request scope
    container.register_scoped::<UnitOfWork, UnitOfWork>()?;
    container.register_scoped::<UserService, UserService>()?;

    container.verify(VerificationMode::Full)?;
    println!("{}", container.analyze()?);

    // === Use the container ===

    for request in 1..=2 {
        let scope = container.begin_scope();
        let service = scope.get_instance::<UserService>()?;
        println!("{}", service.get_user(request));
        scope.dispose();
    }

    container.dispose();
    Ok(())
}
