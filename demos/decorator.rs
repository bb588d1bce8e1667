use sovran_scoped::{poly, scoped, Chain};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

// Log decorators installed per thread. Each thread only ever sees the
// decorators its own call stack put in scope.
trait TextDecorator {
    fn apply(&self, text: &str) -> String;
}

struct UpperCase;

impl TextDecorator for UpperCase {
    fn apply(&self, text: &str) -> String {
        text.to_uppercase()
    }
}

struct Indent;

impl TextDecorator for Indent {
    fn apply(&self, text: &str) -> String {
        let mut result = String::from("    ");
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            result.push(c);
            if c == '\n' && chars.peek().is_some() {
                result.push_str("    ");
            }
        }
        result
    }
}

type ScopedDecorator = Chain<dyn TextDecorator>;

static STDOUT: Mutex<()> = Mutex::new(());

fn log(message: &str) {
    let mut decorated = message.to_string();
    for decorator in ScopedDecorator::iter() {
        decorated = decorator.borrow().apply(&decorated);
    }

    let _guard = STDOUT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    println!("{}", decorated);
}

fn upper_case_worker() {
    scoped!(let _upper = poly!(UpperCase => dyn TextDecorator));
    for _ in 0..5 {
        log("Thread 1: This message is upper case");
        thread::sleep(Duration::from_millis(50));
    }
}

fn indenting_worker() {
    scoped!(let _indent = poly!(Indent => dyn TextDecorator));
    scoped!(let _upper = poly!(UpperCase => dyn TextDecorator));
    for _ in 0..5 {
        log("Thread 2: This message is upper case\nand indented");
        thread::sleep(Duration::from_millis(100));
    }
}

fn main() {
    let t1 = thread::spawn(upper_case_worker);
    let t2 = thread::spawn(indenting_worker);

    for _ in 0..5 {
        log("Main thread: This is a regular message");
        thread::sleep(Duration::from_millis(70));
    }

    t1.join().expect("thread 1 panicked");
    t2.join().expect("thread 2 panicked");
}
