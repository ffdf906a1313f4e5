// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Generates a cloneable, thread-safe wrapper around a user supplied closure.
///
/// Policies keep user callbacks (category functions, predicates, custom backoff curves)
/// behind an `Arc<dyn Fn ...>` so a policy can be shared by every caller of an operation.
///
/// ```rust,ignore
/// define_fn_wrapper!(CategoryFn<E>(Fn(cause: &E) -> FailureCategory));
/// define_fn_wrapper!(CustomBackoffFn(Fn(attempt: u32) -> Duration));
/// ```
///
/// The generated type exposes `new`, `call`, `Clone` and a `Debug` that prints only the type name.
macro_rules! define_fn_wrapper {
    ($name:ident<$($generics:ident),*>(Fn($($param_name:ident: $param_ty:ty),*) -> $return_ty:ty)) => {
        pub(crate) struct $name<$($generics),*>(std::sync::Arc<dyn Fn($($param_ty),*) -> $return_ty + Send + Sync>);

        impl<$($generics),*> $name<$($generics),*> {
            pub(crate) fn new<F>(f: F) -> Self
            where
                F: Fn($($param_ty),*) -> $return_ty + Send + Sync + 'static,
            {
                Self(std::sync::Arc::new(f))
            }

            pub(crate) fn call(&self, $($param_name: $param_ty),*) -> $return_ty {
                (self.0)($($param_name),*)
            }
        }

        impl<$($generics),*> Clone for $name<$($generics),*> {
            fn clone(&self) -> Self {
                Self(std::sync::Arc::clone(&self.0))
            }
        }

        impl<$($generics),*> std::fmt::Debug for $name<$($generics),*> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish_non_exhaustive()
            }
        }
    };

    ($name:ident(Fn($($param_name:ident: $param_ty:ty),*) -> $return_ty:ty)) => {
        $crate::fn_wrapper::define_fn_wrapper!($name<>(Fn($($param_name: $param_ty),*) -> $return_ty));
    };
}

pub(crate) use define_fn_wrapper;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    define_fn_wrapper!(Doubler(Fn(value: u32) -> u32));
    define_fn_wrapper!(Describe<T>(Fn(value: &T) -> String));
    define_fn_wrapper!(Scaled(Fn(attempt: u32, base: Duration) -> Duration));

    #[test]
    fn call_forwards_arguments() {
        let doubler = Doubler::new(|v| v * 2);
        assert_eq!(doubler.call(21), 42);

        let scaled = Scaled::new(|attempt, base| base * attempt);
        assert_eq!(scaled.call(3, Duration::from_millis(10)), Duration::from_millis(30));
    }

    #[test]
    fn generic_wrapper() {
        let describe = Describe::<i32>::new(|v| format!("value={v}"));
        assert_eq!(describe.call(&7), "value=7");
    }

    #[test]
    fn clone_shares_function() {
        let doubler = Doubler::new(|v| v + 1);
        let cloned = doubler.clone();
        assert_eq!(cloned.call(1), doubler.call(1));
    }

    #[test]
    fn debug_prints_name_only() {
        let doubler = Doubler::new(|v| v);
        assert_eq!(format!("{doubler:?}"), "Doubler { .. }");
    }
}
