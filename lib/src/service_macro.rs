//! Collaborator service-table plumbing.
//!
//! Cross-crate subsystems that the lower layers (`core`, `drivers`) need to
//! call into but cannot depend on directly (because the concrete
//! implementation lives above them, typically in `boot`) are wired through a
//! **service table**: a `struct` of plain function pointers, registered once
//! at boot and read thereafter through an `AtomicPtr`.
//!
//! [`define_service!`] generates, for a block of operation signatures:
//! - the service-table struct itself (one `fn` field per operation),
//! - `register_<group>_services(&'static Struct)` and `<group>_services()`,
//! - a thin wrapper function per operation, so callers write
//!   `platform::timer_ticks()` instead of `platform_services().timer_ticks()`.
//!
//! An operation tagged `@no_wrapper` gets a struct field and the registration
//! plumbing but no generated wrapper; the caller supplies one by hand. This
//! is used for operations whose signature needs adjustment at the call site
//! (e.g. `-> !` functions, or ones taking a slice where the raw fn pointer
//! would rather take a pointer+length pair).
#[macro_export]
macro_rules! define_service {
    (
        $group:ident => $Name:ident {
            $(
                $(@$no_wrapper_prefix:tt)? $op:ident ( $($arg:ident : $argty:ty),* $(,)? ) $(-> $ret:ty)?
            );* $(;)?
        }
    ) => {
        #[allow(non_snake_case)]
        pub struct $Name {
            $(
                pub $op: fn($($argty),*) $(-> $ret)?,
            )*
        }

        // SAFETY: every field is a bare function pointer to a `'static` fn;
        // there is no interior mutability to race on.
        unsafe impl Sync for $Name {}

        $crate::paste::paste! {
            static [<__ $group:upper _SERVICES>]: core::sync::atomic::AtomicPtr<$Name> =
                core::sync::atomic::AtomicPtr::new(core::ptr::null_mut());

            #[doc = concat!("Register the `", stringify!($group), "` collaborator service table.")]
            ///
            /// Must be called exactly once, during early boot, before any
            /// accessor below is used. Later calls silently replace the
            /// table; this is only exercised by tests that swap in mocks.
            pub fn [<register_ $group _services>](services: &'static $Name) {
                [<__ $group:upper _SERVICES>].store(
                    services as *const $Name as *mut $Name,
                    core::sync::atomic::Ordering::Release,
                );
            }

            #[doc = concat!("Fetch the registered `", stringify!($group), "` service table.")]
            ///
            /// # Panics
            /// Panics if the table has not yet been registered.
            pub fn [<$group _services>]() -> &'static $Name {
                let ptr = [<__ $group:upper _SERVICES>].load(core::sync::atomic::Ordering::Acquire);
                assert!(!ptr.is_null(), concat!(stringify!($group), " services not registered"));
                unsafe { &*ptr }
            }

            $(
                $crate::__service_wrapper! {
                    [$(@$no_wrapper_prefix)?] $group $op [$($arg : $argty),*] [$(-> $ret)?]
                }
            )*
        }
    };
}

/// Internal helper for [`define_service!`]; emits the per-operation wrapper
/// unless the operation was tagged `@no_wrapper`.
#[macro_export]
macro_rules! __service_wrapper {
    ([@no_wrapper] $group:ident $op:ident [$($arg:ident : $argty:ty),*] [$(-> $ret:ty)?]) => {};
    ([] $group:ident $op:ident [$($arg:ident : $argty:ty),*] [$(-> $ret:ty)?]) => {
        $crate::paste::paste! {
            #[inline(always)]
            pub fn $op($($arg: $argty),*) $(-> $ret)? {
                ([<$group _services>]().$op)($($arg),*)
            }
        }
    };
}
