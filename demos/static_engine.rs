//! A minimal end-to-end walkthrough of the graph: a `State`, a `Computed`
//! derived from it, and a `Watcher` that logs every time the computed's
//! output may have gone stale.

use reactive_graph::{Computed, State, Watcher};

fn main() {
    let count = State::new(1i64);
    let doubled = {
        let count = count.clone();
        Computed::<i64>::new(move || Ok(*count.get()? * 2))
    };

    let watcher = Watcher::new(|| println!("doubled may have changed"));
    watcher.watch(&[doubled.id()]).unwrap();

    println!("{:?}", doubled.get().unwrap());
    count.set(21).unwrap();
    println!("{:?}", doubled.get().unwrap());
}
