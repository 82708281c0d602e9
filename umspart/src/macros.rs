// SPDX-License-Identifier: MIT

#[macro_export]
/// Defines a set of GPT partition types with their GUID constants, a
/// matching predicate per type and the `GptPartitionKind` enum.
///
/// # Example
/// ```rust
/// use umspart::define_partition_types;
///
/// define_partition_types! {
///     EFI => "EFI System Partition", [0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B],
/// }
/// ```
///
/// For each `$name` this generates:
/// - `pub const GPT_PARTITION_TYPE_<NAME>: [u8; 16]`
/// - `pub fn is_<name>_partition(entry: &GptEntry) -> bool`
///
/// The `Unknown` variant keeps the raw GUID of unrecognized types.
macro_rules! define_partition_types {
    (
        $(
            $name:ident => $desc:expr, $guid:expr
        ),+ $(,)?
    ) => {
        paste::paste! {
            $(
                #[doc = $desc]
                pub const [<GPT_PARTITION_TYPE_ $name:upper>]: [u8; 16] = $guid;

                #[doc = concat!("Checks if a GPT partition is of type: ", $desc)]
                pub fn [<is_ $name:lower _partition>](
                    entry: &$crate::gpt::GptEntry,
                ) -> bool {
                    entry.type_guid == [<GPT_PARTITION_TYPE_ $name:upper>]
                }
            )+

            #[allow(non_camel_case_types)]
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum GptPartitionKind {
                $($name,)+
                Unknown([u8; 16]),
            }

            impl GptPartitionKind {
                pub fn from_guid(guid: &[u8; 16]) -> Self {
                    match guid {
                        $(g if g == &[<GPT_PARTITION_TYPE_ $name:upper>] => Self::$name,)+
                        other => Self::Unknown(*other),
                    }
                }

                pub fn as_guid(&self) -> [u8; 16] {
                    match self {
                        $(Self::$name => [<GPT_PARTITION_TYPE_ $name:upper>],)+
                        Self::Unknown(g) => *g,
                    }
                }
            }

            impl core::fmt::Display for GptPartitionKind {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $(Self::$name => write!(f, $desc),)+
                        Self::Unknown(guid) => write!(f, "Unknown ({:02X?})", guid),
                    }
                }
            }
        }
    };
}
