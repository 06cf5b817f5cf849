use thiserror::Error;

/// adds `From<D>` for an enum with a variant containing D
#[macro_export]
macro_rules! variant_from_data {
    ($enum:ty, $variant:ident, $data_type:ty) => {
        impl std::convert::From<$data_type> for $enum {
            fn from(c: $data_type) -> Self {
                <$enum>::$variant(c)
            }
        }
    };
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Got {other_ndim} dimensions when expecting {ref_ndim}")]
pub struct DimensionMismatch {
    ref_ndim: usize,
    other_ndim: usize,
}

impl DimensionMismatch {
    pub fn check_coords(coord_ndim: usize, array_ndim: usize) -> Result<(), Self> {
        if coord_ndim == array_ndim {
            Ok(())
        } else {
            Err(Self {
                ref_ndim: array_ndim,
                other_ndim: coord_ndim,
            })
        }
    }
}

/// Product of an iterator of sizes, or `None` on overflow.
pub(crate) fn checked_product<I: IntoIterator<Item = u64>>(it: I) -> Option<u64> {
    it.into_iter().try_fold(1u64, |acc, n| acc.checked_mul(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_overflows() {
        assert_eq!(checked_product([2, 3, 4]), Some(24));
        assert_eq!(checked_product([]), Some(1));
        assert_eq!(checked_product([u64::MAX, 2]), None);
    }

    #[test]
    fn mismatch_reports_both() {
        let e = DimensionMismatch::check_coords(2, 3).unwrap_err();
        assert_eq!(e.to_string(), "Got 2 dimensions when expecting 3");
    }
}
