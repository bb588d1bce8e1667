use sovran_scoped::{scoped, Scoped};
use std::fmt;

// Every counter in scope observes every calculator operation, so a caller
// can measure just the work done inside its own block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Default)]
struct Counter {
    counts: [u32; 4],
}

impl Counter {
    fn increment(&mut self, event: Event) {
        self.counts[event as usize] += 1;
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ADD: {} SUB: {} MUL: {} DIV: {}",
            self.counts[Event::Add as usize],
            self.counts[Event::Sub as usize],
            self.counts[Event::Mul as usize],
            self.counts[Event::Div as usize]
        )
    }
}

struct CounterTag;
type ScopedCounter = Scoped<Counter, CounterTag>;

#[derive(Debug, Default)]
struct Calculator {
    result: f64,
}

impl Calculator {
    fn add(&mut self, x: f64) {
        Self::record(Event::Add);
        self.result += x;
    }

    #[allow(dead_code)]
    fn subtract(&mut self, x: f64) {
        Self::record(Event::Sub);
        self.result -= x;
    }

    fn multiply(&mut self, x: f64) {
        Self::record(Event::Mul);
        self.result *= x;
    }

    fn divide(&mut self, x: f64) {
        Self::record(Event::Div);
        self.result /= x;
    }

    fn clear(&mut self) {
        self.result = 0.0;
    }

    fn record(event: Event) {
        for counter in ScopedCounter::iter() {
            counter.borrow_mut().increment(event);
        }
    }
}

fn average(values: &[f64], calc: &mut Calculator) -> f64 {
    scoped!(let counter = ScopedCounter::default());
    calc.clear();
    for &value in values {
        calc.add(value);
    }
    calc.divide(values.len() as f64);
    println!("calc event count in average(): {}", *counter.value());
    calc.result
}

fn main() {
    let mut calc = Calculator::default();
    scoped!(let counter = ScopedCounter::default());

    let avg = average(&[1.0, 2.0, 3.0, 4.0, 5.0], &mut calc);
    println!("Average: {}", avg);

    calc.clear();
    calc.add(2.0);
    calc.multiply(3.0);
    calc.multiply(7.0);
    println!("The meaning of life is: {}", calc.result);

    println!("Total calc event count in main(): {}", *counter.value());
}
