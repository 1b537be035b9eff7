use std::any::Any;

/// The engine's default equality: ordinary `PartialEq`, except that two
/// `NaN`s of the same float type are treated as equal (`Object.is`-style
/// identity rather than IEEE-754 comparison). Checked via a runtime
/// downcast rather than specialization, since stable Rust has no way to
/// special-case `f32`/`f64` inside a single blanket `impl<T: PartialEq>`.
pub(crate) fn default_eq<T: PartialEq + 'static>(a: &T, b: &T) -> bool {
    if let (Some(a), Some(b)) = (
        (a as &dyn Any).downcast_ref::<f64>(),
        (b as &dyn Any).downcast_ref::<f64>(),
    ) {
        return a == b || (a.is_nan() && b.is_nan());
    }
    if let (Some(a), Some(b)) = (
        (a as &dyn Any).downcast_ref::<f32>(),
        (b as &dyn Any).downcast_ref::<f32>(),
    ) {
        return a == b || (a.is_nan() && b.is_nan());
    }
    a == b
}

/// Type-erases a typed comparator so it can live on a homogeneous `Node`.
pub(crate) fn erase_eq<T: PartialEq + 'static>(
    custom: Option<Box<dyn Fn(&T, &T) -> bool>>,
) -> Box<dyn Fn(&dyn Any, &dyn Any) -> bool> {
    match custom {
        Some(f) => Box::new(move |a, b| {
            f(
                a.downcast_ref::<T>().expect("eq called with wrong type"),
                b.downcast_ref::<T>().expect("eq called with wrong type"),
            )
        }),
        None => Box::new(|a, b| {
            default_eq(
                a.downcast_ref::<T>().expect("eq called with wrong type"),
                b.downcast_ref::<T>().expect("eq called with wrong type"),
            )
        }),
    }
}
