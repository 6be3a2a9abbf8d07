//! 诊断算法使用的灰度图像基础运算
//!
//! 所有卷积在边界处按最近像素延拓。

use image::{imageops, GrayImage, RgbImage};

/// 以 f64 存储的单通道图像
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl Plane {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(width * height, data.len());
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        Self::new(
            gray.width() as usize,
            gray.height() as usize,
            gray.as_raw().iter().map(|&v| f64::from(v)).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn clamped(&self, x: isize, y: isize) -> f64 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.width + cx]
    }

    pub fn mean(&self) -> f64 {
        mean(&self.data)
    }

    pub fn variance(&self) -> f64 {
        variance(&self.data)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// 像素满足条件的比例
    pub fn ratio_where(&self, predicate: impl Fn(f64) -> bool) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.data.iter().filter(|&&v| predicate(v)).count() as f64 / self.len() as f64
    }

    pub fn abs_diff(&self, other: &Plane) -> Plane {
        Plane::new(
            self.width,
            self.height,
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| (a - b).abs())
                .collect(),
        )
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Plane {
        Plane::new(self.width, self.height, self.data.iter().map(|&v| f(v)).collect())
    }

    /// 3x3 卷积
    pub fn convolve3(&self, kernel: [[f64; 3]; 3]) -> Plane {
        let mut out = vec![0.0; self.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = 0.0;
                for (ky, row) in kernel.iter().enumerate() {
                    for (kx, weight) in row.iter().enumerate() {
                        if *weight != 0.0 {
                            acc += weight
                                * self.clamped(
                                    x as isize + kx as isize - 1,
                                    y as isize + ky as isize - 1,
                                );
                        }
                    }
                }
                out[y * self.width + x] = acc;
            }
        }
        Plane::new(self.width, self.height, out)
    }

    /// 可分离的一维核分别在水平、垂直方向上卷积
    fn separable(&self, kernel: &[f64]) -> Plane {
        let radius = (kernel.len() / 2) as isize;
        let mut horizontal = vec![0.0; self.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                horizontal[y * self.width + x] = kernel
                    .iter()
                    .enumerate()
                    .map(|(i, w)| w * self.clamped(x as isize + i as isize - radius, y as isize))
                    .sum();
            }
        }
        let horizontal = Plane::new(self.width, self.height, horizontal);
        let mut out = vec![0.0; self.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                out[y * self.width + x] = kernel
                    .iter()
                    .enumerate()
                    .map(|(i, w)| {
                        w * horizontal.clamped(x as isize, y as isize + i as isize - radius)
                    })
                    .sum();
            }
        }
        Plane::new(self.width, self.height, out)
    }

    /// 方形窗口的最小值 / 最大值滤波
    fn rank_filter(&self, size: usize, pick: fn(f64, f64) -> f64, init: f64) -> Plane {
        let before = (size / 2) as isize;
        let after = size as isize - before - 1;
        let mut horizontal = vec![init; self.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = init;
                for dx in -before..=after {
                    acc = pick(acc, self.clamped(x as isize + dx, y as isize));
                }
                horizontal[y * self.width + x] = acc;
            }
        }
        let horizontal = Plane::new(self.width, self.height, horizontal);
        let mut out = vec![init; self.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = init;
                for dy in -before..=after {
                    acc = pick(acc, horizontal.clamped(x as isize, y as isize + dy));
                }
                out[y * self.width + x] = acc;
            }
        }
        Plane::new(self.width, self.height, out)
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// 线性插值的百分位数，`p` 取值 0..=100
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn to_gray(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

pub fn gray_plane(image: &RgbImage) -> Plane {
    Plane::from_gray(&to_gray(image))
}

/// 缩放后的灰度平面，用于帧间比较
pub fn downscaled_gray(image: &RgbImage, width: u32, height: u32) -> Plane {
    let gray = to_gray(image);
    let resized = imageops::resize(&gray, width, height, imageops::FilterType::Triangle);
    Plane::from_gray(&resized)
}

/// 4邻域拉普拉斯
pub fn laplacian(plane: &Plane) -> Plane {
    plane.convolve3([[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]])
}

/// 8邻域高通滤波
pub fn high_pass(plane: &Plane) -> Plane {
    plane.convolve3([[-1.0, -1.0, -1.0], [-1.0, 8.0, -1.0], [-1.0, -1.0, -1.0]])
}

/// 3x3 Sobel 梯度 (gx, gy)
pub fn sobel(plane: &Plane) -> (Plane, Plane) {
    let gx = plane.convolve3([[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]]);
    let gy = plane.convolve3([[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]]);
    (gx, gy)
}

pub fn gradient_magnitude(plane: &Plane) -> Plane {
    let (gx, gy) = sobel(plane);
    Plane::new(
        plane.width,
        plane.height,
        gx.data
            .iter()
            .zip(&gy.data)
            .map(|(x, y)| (x * x + y * y).sqrt())
            .collect(),
    )
}

pub fn gaussian_blur(plane: &Plane, sigma: f64) -> Plane {
    let sigma = sigma.max(0.1);
    let radius = (sigma * 3.0).ceil() as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= sum);
    plane.separable(&kernel)
}

pub fn erode(plane: &Plane, size: usize) -> Plane {
    plane.rank_filter(size, f64::min, f64::INFINITY)
}

pub fn dilate(plane: &Plane, size: usize) -> Plane {
    plane.rank_filter(size, f64::max, f64::NEG_INFINITY)
}

/// 形态学开运算
pub fn morph_open(plane: &Plane, size: usize) -> Plane {
    dilate(&erode(plane, size), size)
}

/// 形态学闭运算
pub fn morph_close(plane: &Plane, size: usize) -> Plane {
    erode(&dilate(plane, size), size)
}

/// Canny 边缘检测，返回边缘掩码
///
/// 梯度幅值使用 L1 范数，非极大值抑制按四个方向量化。
pub fn canny(plane: &Plane, low: f64, high: f64) -> Vec<bool> {
    let (w, h) = (plane.width, plane.height);
    let (gx, gy) = sobel(plane);
    let magnitude: Vec<f64> = gx
        .data
        .iter()
        .zip(&gy.data)
        .map(|(x, y)| x.abs() + y.abs())
        .collect();

    let at = |x: isize, y: isize| -> f64 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            magnitude[y as usize * w + x as usize]
        }
    };

    let mut suppressed = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let m = magnitude[i];
            if m < low {
                continue;
            }
            let mut angle = gy.data[i].atan2(gx.data[i]).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            let (dx, dy) = if !(22.5..157.5).contains(&angle) {
                (1, 0)
            } else if angle < 67.5 {
                (1, 1)
            } else if angle < 112.5 {
                (0, 1)
            } else {
                (-1, 1)
            };
            let (xi, yi) = (x as isize, y as isize);
            // 正向严格大于、反向允许相等，阶跃两侧等幅时只保留一侧
            if m > at(xi + dx, yi + dy) && m >= at(xi - dx, yi - dy) {
                suppressed[i] = m;
            }
        }
    }

    let mut edges = vec![false; w * h];
    let mut stack: Vec<usize> = Vec::new();
    for (i, &m) in suppressed.iter().enumerate() {
        if m >= high {
            edges[i] = true;
            stack.push(i);
        }
    }
    while let Some(i) = stack.pop() {
        let (x, y) = ((i % w) as isize, (i / w) as isize);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if !edges[j] && suppressed[j] >= low {
                    edges[j] = true;
                    stack.push(j);
                }
            }
        }
    }
    edges
}

/// 边缘像素占比
pub fn edge_density(edges: &[bool]) -> f64 {
    if edges.is_empty() {
        return 0.0;
    }
    edges.iter().filter(|&&e| e).count() as f64 / edges.len() as f64
}

/// 贯穿画面的水平/垂直直线数量
///
/// 某一行（列）中边缘像素占比达到 `coverage` 即视为一条直线。
pub fn straight_line_count(edges: &[bool], width: usize, height: usize, coverage: f64) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    let rows = (0..height)
        .filter(|&y| {
            let count = edges[y * width..(y + 1) * width].iter().filter(|&&e| e).count();
            count as f64 / width as f64 >= coverage
        })
        .count();
    let cols = (0..width)
        .filter(|&x| {
            let count = (0..height).filter(|&y| edges[y * width + x]).count();
            count as f64 / height as f64 >= coverage
        })
        .count();
    rows + cols
}

/// RGB 三通道直方图
pub fn channel_histograms(image: &RgbImage) -> [[f64; 256]; 3] {
    let mut hist = [[0.0; 256]; 3];
    for pixel in image.pixels() {
        for (c, value) in pixel.0.iter().enumerate() {
            hist[c][*value as usize] += 1.0;
        }
    }
    hist
}

/// 三通道均值 (r, g, b)
pub fn channel_means(image: &RgbImage) -> (f64, f64, f64) {
    let count = (image.width() as f64) * (image.height() as f64);
    if count == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let (mut r, mut g, mut b) = (0.0, 0.0, 0.0);
    for pixel in image.pixels() {
        r += f64::from(pixel.0[0]);
        g += f64::from(pixel.0[1]);
        b += f64::from(pixel.0[2]);
    }
    (r / count, g / count, b / count)
}

/// RGB 转 HSV，色相使用 0..180 的刻度，饱和度与明度为 0..255
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max == 0.0 { 0.0 } else { delta / max * 255.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    (h / 2.0, s, v)
}
