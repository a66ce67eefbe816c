//! Activation function types.

/// [Activation function](https://en.wikipedia.org/wiki/Activation_function)
/// types.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Activator {
    /// Logistic sigmoid, saturating at 0 and 1.
    Sigmoid,
    /// Hyperbolic tan function
    TanH,
    /// Rectified Linear Unit
    ReLU,
    /// Leaky Rectified Linear Unit
    ///
    /// Takes an `alpha` value to use for negative inputs.
    LeakyReLU(f64),
    /// Passes the pre-activation through unchanged.
    Identity,
}

impl Default for Activator {
    fn default() -> Self {
        Activator::Sigmoid
    }
}

impl Activator {
    /// Evaluates `f(x)` for the selected activation function.
    pub fn f(&self, x: f64) -> f64 {
        match *self {
            Activator::Sigmoid => {
                if x >= 0.0 {
                    1.0 / (1.0 + (-x).exp())
                } else {
                    let z = x.exp();
                    z / (1.0 + z)
                }
            }
            Activator::TanH => x.tanh(),
            Activator::ReLU => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
            Activator::LeakyReLU(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Activator::Identity => x,
        }
    }

    /// Evaluates the derivative `f'(x)`, where `x = f^{-1}(y)`.
    ///
    /// Note that this function takes in the *output* of the activation
    /// function, rather than the input, so a cell only needs its cached
    /// output to backpropagate.
    pub fn fprime(&self, y: f64) -> f64 {
        match *self {
            Activator::Sigmoid => y * (1.0 - y),
            Activator::TanH => 1.0 - y * y,
            Activator::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activator::LeakyReLU(alpha) => {
                if y > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activator::Identity => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_saturates() {
        assert!((Activator::Sigmoid.f(0.0) - 0.5).abs() < 1e-12);
        assert!(Activator::Sigmoid.f(40.0) > 0.999_999);
        assert!(Activator::Sigmoid.f(-40.0) < 1e-6);
        assert!(Activator::Sigmoid.f(-1000.0).is_finite());
    }

    #[test]
    fn derivatives_from_output() {
        let y = Activator::Sigmoid.f(0.0);
        assert!((Activator::Sigmoid.fprime(y) - 0.25).abs() < 1e-12);

        let y = Activator::TanH.f(0.3);
        assert!((Activator::TanH.fprime(y) - (1.0 - y * y)).abs() < 1e-12);

        assert_eq!(Activator::ReLU.fprime(0.0), 0.0);
        assert_eq!(Activator::ReLU.fprime(2.0), 1.0);
        assert_eq!(Activator::LeakyReLU(0.1).f(-2.0), -0.2);
        assert_eq!(Activator::LeakyReLU(0.1).fprime(-0.2), 0.1);
        assert_eq!(Activator::Identity.fprime(-3.0), 1.0);
    }

    #[test]
    fn sigmoid_derivative_matches_finite_difference() {
        let h = 1e-6;
        for &x in &[-2.0, -0.5, 0.0, 0.7, 3.0] {
            let numeric =
                (Activator::Sigmoid.f(x + h) - Activator::Sigmoid.f(x - h)) / (2.0 * h);
            let analytic = Activator::Sigmoid.fprime(Activator::Sigmoid.f(x));
            assert!((numeric - analytic).abs() < 1e-6);
        }
    }
}
