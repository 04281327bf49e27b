//! Derivative-free minimisation (Nelder–Mead simplex) used by the optimised linear fit.

/// Simplex settings. Convergence requires both the simplex extent and the spread of its
/// function values to fall under their tolerances.
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    pub max_iterations: usize,
    pub xatol: f64,
    pub fatol: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            xatol: 1e-10,
            fatol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

impl NelderMead {
    pub fn minimize<F>(&self, objective: F, start: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let dims = start.len();
        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dims + 1);
        simplex.push(start.to_vec());
        for axis in 0..dims {
            let mut vertex = start.to_vec();
            vertex[axis] = if vertex[axis] != 0.0 {
                vertex[axis] * 1.05
            } else {
                0.00025
            };
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|vertex| objective(vertex)).collect();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            order_simplex(&mut simplex, &mut values);
            if self.has_converged(&simplex, &values) {
                converged = true;
                break;
            }
            iterations += 1;

            let worst = dims;
            let centroid = centroid(&simplex[..worst]);
            let reflected = along(&centroid, &simplex[worst], REFLECTION);
            let f_reflected = objective(&reflected);

            if f_reflected < values[0] {
                let expanded = along(&centroid, &simplex[worst], REFLECTION * EXPANSION);
                let f_expanded = objective(&expanded);
                if f_expanded < f_reflected {
                    simplex[worst] = expanded;
                    values[worst] = f_expanded;
                } else {
                    simplex[worst] = reflected;
                    values[worst] = f_reflected;
                }
                continue;
            }

            if f_reflected < values[worst - 1] {
                simplex[worst] = reflected;
                values[worst] = f_reflected;
                continue;
            }

            let (contracted, f_contracted, accepted) = if f_reflected < values[worst] {
                let outside = along(&centroid, &simplex[worst], REFLECTION * CONTRACTION);
                let f_outside = objective(&outside);
                (outside, f_outside, f_outside <= f_reflected)
            } else {
                let inside = along(&centroid, &simplex[worst], -CONTRACTION);
                let f_inside = objective(&inside);
                (inside, f_inside, f_inside < values[worst])
            };

            if accepted {
                simplex[worst] = contracted;
                values[worst] = f_contracted;
                continue;
            }

            let best = simplex[0].clone();
            for idx in 1..=dims {
                simplex[idx] = best
                    .iter()
                    .zip(&simplex[idx])
                    .map(|(b, v)| b + SHRINK * (v - b))
                    .collect();
                values[idx] = objective(&simplex[idx]);
            }
        }

        order_simplex(&mut simplex, &mut values);
        Minimum {
            point: simplex.swap_remove(0),
            value: values[0],
            iterations,
            converged,
        }
    }

    fn has_converged(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        let best = &simplex[0];
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|vertex| vertex.iter().zip(best).map(|(v, b)| (v - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|value| (value - values[0]).abs())
            .fold(0.0_f64, f64::max);
        x_spread <= self.xatol && f_spread <= self.fatol
    }
}

fn order_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]));
    *simplex = order.iter().map(|idx| simplex[*idx].clone()).collect();
    *values = order.iter().map(|idx| values[*idx]).collect();
}

fn centroid(vertices: &[Vec<f64>]) -> Vec<f64> {
    let count = vertices.len() as f64;
    let dims = vertices.first().map(Vec::len).unwrap_or(0);
    (0..dims)
        .map(|axis| vertices.iter().map(|vertex| vertex[axis]).sum::<f64>() / count)
        .collect()
}

/// `centroid + coeff * (centroid - worst)`.
fn along(centroid: &[f64], worst: &[f64], coeff: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(worst)
        .map(|(c, w)| c + coeff * (c - w))
        .collect()
}
