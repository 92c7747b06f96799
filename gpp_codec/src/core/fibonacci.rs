/// Fibonacci sequence starting at 1, 2 as used by the fibonacci integer encoding.
///
/// The sequence ends instead of wrapping when the next term overflows a `u64`.
pub(crate) struct Fibonacci {
    curr: Option<u64>,
    next: Option<u64>,
}

impl Iterator for Fibonacci {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let next = self.curr?.checked_add(self.next?);

        self.curr = self.next;
        self.next = next;

        self.curr
    }
}

pub(crate) fn fibonacci_iterator() -> Fibonacci {
    Fibonacci {
        curr: Some(1),
        next: Some(1),
    }
}

/// Zeckendorf representation of `value`, lowest term first, without the terminating bit.
///
/// Returns an empty vector for 0, which has no representation.
pub(crate) fn zeckendorf(value: u64) -> Vec<bool> {
    let terms: Vec<u64> = fibonacci_iterator().take_while(|&f| f <= value).collect();
    let mut bits = vec![false; terms.len()];
    let mut rest = value;

    for (i, &term) in terms.iter().enumerate().rev() {
        if term <= rest {
            bits[i] = true;
            rest -= term;
        }
    }

    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn sequence_is_correct() {
        assert_eq!(
            fibonacci_iterator().take(16).collect::<Vec<_>>(),
            vec![1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 377, 610, 987, 1597]
        );
    }

    #[test]
    fn sequence_stops_before_overflow() {
        let last = fibonacci_iterator().last();
        assert_eq!(last, Some(12200160415121876738));
    }

    #[test_case(0 => Vec::<bool>::new() ; "zero")]
    #[test_case(1 => vec![true] ; "one")]
    #[test_case(2 => vec![false, true] ; "two")]
    #[test_case(4 => vec![true, false, true] ; "four")]
    #[test_case(12 => vec![true, false, true, false, true] ; "twelve")]
    fn zeckendorf_terms(value: u64) -> Vec<bool> {
        zeckendorf(value)
    }
}
