use sovran_scoped::{scoped, Scoped};

// A logger that only exists while some caller wants one. Code further down
// the stack finds it without a global and without a parameter.
struct Logger {
    prefix: String,
}

impl Logger {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn println(&self, text: &str) {
        println!("{}: {}", self.prefix, text);
    }
}

struct LoggerTag;
type ScopedLogger = Scoped<Logger, LoggerTag>;

fn foo() {
    match ScopedLogger::get() {
        Some(logger) => logger.println("Calling from foo"),
        None => println!("No logger found"),
    }
}

fn main() {
    // No logger yet
    foo();

    scoped!(let _logger = ScopedLogger::new(Logger::new("LOGGER")));
    foo();

    {
        // A nested scope can swap in its own logger for a while
        scoped!(let _audit = ScopedLogger::new(Logger::new("AUDIT")));
        foo();
    }

    foo();
}
