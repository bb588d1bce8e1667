use sovran_scoped::{scoped, Scoped};

// A scoped integer acting as the "BIG" threshold for whatever code runs
// inside the block that installs it.
struct ThresholdTag;
type ScopedThreshold = Scoped<i32, ThresholdTag>;

fn print_number(x: i32) {
    print!("The number is ");
    if let Some(thresh) = ScopedThreshold::get() {
        if x >= *thresh {
            println!("BIG");
            return;
        }
    }
    println!("{}", x);
}

fn main() {
    {
        scoped!(let _threshold = ScopedThreshold::new(4));

        print_number(3); // The number is 3
        print_number(10); // The number is BIG

        {
            // Nested code can opt out of every threshold in effect
            let _shield = ScopedThreshold::shield();
            print_number(10); // The number is 10
        }

        {
            scoped!(let _stricter = ScopedThreshold::new(2));
            print_number(3); // The number is BIG
        }
        print_number(3); // The number is 3
    }
    print_number(10); // The number is 10
}
