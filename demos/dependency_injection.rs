use sovran_scoped::{poly, scoped, Chain};
use std::fmt;

// The caller decides how division errors are handled by putting a handler
// in scope; the calculator never takes one as a parameter.
#[derive(Debug, Clone, PartialEq)]
struct CalcError(String);

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CalcError {}

trait ErrorHandler {
    fn handle_error(&self, message: &str) -> Result<(), CalcError>;
}

/// Reports the error and lets the computation continue
struct ConsoleErrorHandler;

impl ErrorHandler for ConsoleErrorHandler {
    fn handle_error(&self, message: &str) -> Result<(), CalcError> {
        eprintln!("ERROR: {}", message);
        Ok(())
    }
}

/// Turns the error into a failure of the whole computation
struct FailingErrorHandler;

impl ErrorHandler for FailingErrorHandler {
    fn handle_error(&self, message: &str) -> Result<(), CalcError> {
        Err(CalcError(message.to_string()))
    }
}

type ScopedErrorHandler = Chain<dyn ErrorHandler>;

struct Calculator;

impl Calculator {
    fn divide(&self, x: f64, y: f64) -> Result<f64, CalcError> {
        if y == 0.0 {
            if let Some(handler) = ScopedErrorHandler::get() {
                handler.handle_error("Cannot divide by zero")?;
            }
            return Ok(f64::NAN);
        }
        Ok(x / y)
    }
}

fn failing_block(calculator: &Calculator) -> Result<(), CalcError> {
    scoped!(let _handler = poly!(FailingErrorHandler => dyn ErrorHandler));
    println!("5 / 2 = {}", calculator.divide(5.0, 2.0)?);
    println!("5 / 0 = {}", calculator.divide(5.0, 0.0)?);
    Ok(())
}

fn main() {
    let calculator = Calculator;

    scoped!(let _console = poly!(ConsoleErrorHandler => dyn ErrorHandler));

    if let (Ok(a), Ok(b)) = (calculator.divide(5.0, 2.0), calculator.divide(5.0, 0.0)) {
        println!("5 / 2 = {}", a);
        println!("5 / 0 = {}", b);
    }

    if let Err(e) = failing_block(&calculator) {
        println!("Caught error: {}", e);
    }

    // The failing handler is gone again
    match calculator.divide(1.0, 0.0) {
        Ok(value) => println!("1 / 0 = {}", value),
        Err(e) => println!("unexpected: {}", e),
    }
}
