//! Minimal enclosing sphere of a point set
//!
//! Welzl's recursion: a point outside the sphere of the remaining points must
//! lie on the boundary of the minimal sphere, so it joins the support set.
//! At most four support points define the sphere. Arithmetic runs in f64;
//! frustum corners sit hundreds of units from the origin and the
//! circumsphere formulas cancel badly in f32.

use cgmath::{InnerSpace, MetricSpace, Point3, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Point3<f32>,
    pub radius: f32,
}

/// Sphere during the recursion. A negative `radius2` contains nothing.
#[derive(Debug, Clone, Copy)]
struct Ball {
    center: Point3<f64>,
    radius2: f64,
}

impl Ball {
    fn empty() -> Ball {
        Ball {
            center: Point3::new(0.0, 0.0, 0.0),
            radius2: -1.0,
        }
    }

    fn contains(&self, p: Point3<f64>) -> bool {
        self.radius2 >= 0.0 && self.center.distance2(p) <= self.radius2 * (1.0 + 1e-7) + 1e-12
    }
}

/// Smallest sphere enclosing all `points`; `None` for an empty slice
pub fn bounding_sphere_from_points(points: &[Point3<f32>]) -> Option<BoundingSphere> {
    if points.is_empty() {
        return None;
    }
    let wide: Vec<Point3<f64>> = points
        .iter()
        .map(|p| Point3::new(p.x as f64, p.y as f64, p.z as f64))
        .collect();

    let mut support = Vec::with_capacity(4);
    let ball = welzl(&wide, wide.len(), &mut support);

    // Rounding to f32 can leave a point a hair outside
    let center = Point3::new(ball.center.x as f32, ball.center.y as f32, ball.center.z as f32);
    let radius = points
        .iter()
        .map(|p| p.distance(center))
        .fold(ball.radius2.max(0.0).sqrt() as f32, f32::max);

    Some(BoundingSphere { center, radius })
}

fn welzl(points: &[Point3<f64>], n: usize, support: &mut Vec<Point3<f64>>) -> Ball {
    if n == 0 || support.len() == 4 {
        return ball_from_support(support);
    }
    let p = points[n - 1];
    let ball = welzl(points, n - 1, support);
    if ball.contains(p) {
        return ball;
    }
    support.push(p);
    let ball = welzl(points, n - 1, support);
    support.pop();
    ball
}

fn ball_from_support(support: &[Point3<f64>]) -> Ball {
    match *support {
        [] => Ball::empty(),
        [a] => Ball {
            center: a,
            radius2: 0.0,
        },
        [a, b] => diametral(a, b),
        [a, b, c] => circumscribed_triangle(a, b, c).unwrap_or_else(|| smallest_of_subsets(support)),
        [a, b, c, d] => circumscribed_tetrahedron(a, b, c, d).unwrap_or_else(|| smallest_of_subsets(support)),
        _ => smallest_of_subsets(&support[..4]),
    }
}

fn diametral(a: Point3<f64>, b: Point3<f64>) -> Ball {
    let center = Point3::new((a.x + b.x) * 0.5, (a.y + b.y) * 0.5, (a.z + b.z) * 0.5);
    Ball {
        center,
        radius2: center.distance2(a),
    }
}

/// Sphere through three points, centred in their plane
fn circumscribed_triangle(a: Point3<f64>, b: Point3<f64>, c: Point3<f64>) -> Option<Ball> {
    let u = a - c;
    let v = b - c;
    let normal = u.cross(v);
    let normal2 = normal.magnitude2();
    let scale = u.magnitude2().max(v.magnitude2());
    if normal2 <= 1e-18 * scale * scale {
        return None;
    }
    let offset = (v * u.magnitude2() - u * v.magnitude2()).cross(normal) / (2.0 * normal2);
    Some(Ball {
        center: c + offset,
        radius2: offset.magnitude2(),
    })
}

/// Sphere through four points
fn circumscribed_tetrahedron(
    a: Point3<f64>,
    b: Point3<f64>,
    c: Point3<f64>,
    d: Point3<f64>,
) -> Option<Ball> {
    let u = b - a;
    let v = c - a;
    let w = d - a;
    let det = 2.0 * u.dot(v.cross(w));
    let scale = (u.magnitude2() * v.magnitude2() * w.magnitude2()).sqrt();
    if det.abs() <= 1e-12 * scale {
        return None;
    }
    let offset: Vector3<f64> =
        (v.cross(w) * u.magnitude2() + w.cross(u) * v.magnitude2() + u.cross(v) * w.magnitude2()) / det;
    Some(Ball {
        center: a + offset,
        radius2: offset.magnitude2(),
    })
}

/// Degenerate support sets (collinear or coplanar): smallest sphere through a
/// pair or triple that still holds every support point
fn smallest_of_subsets(support: &[Point3<f64>]) -> Ball {
    let mut best: Option<Ball> = None;
    let mut consider = |ball: Ball| {
        if support.iter().all(|p| ball.contains(*p)) && best.map_or(true, |b| ball.radius2 < b.radius2) {
            best = Some(ball);
        }
    };
    for i in 0..support.len() {
        for j in i + 1..support.len() {
            consider(diametral(support[i], support[j]));
            for k in j + 1..support.len() {
                if let Some(ball) = circumscribed_triangle(support[i], support[j], support[k]) {
                    consider(ball);
                }
            }
        }
    }
    best.unwrap_or(Ball::empty())
}
